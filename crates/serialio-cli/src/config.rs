//! Service configuration – `~/.serialio/config.toml`, `SERIALIO_*` variables
//! and command-line flags.
//!
//! Precedence, highest first: flags, environment, file, built-in defaults.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolved service settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Redis host.
    #[serde(default = "default_host")]
    pub host: String,

    /// Redis port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Device names to route, e.g. `["ttyUSB0", "ttyACM0"]`.
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,

    /// Directory the device nodes live under.
    #[serde(default = "default_device_root")]
    pub device_root: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    6379
}
fn default_devices() -> Vec<String> {
    vec!["ttyUSB".to_string()]
}
fn default_device_root() -> String {
    "/dev".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            devices: default_devices(),
            device_root: default_device_root(),
        }
    }
}

/// Values given on the command line.  `None` / empty means "not given".
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub devices: Vec<String>,
    pub device_root: Option<String>,
}

/// Return the path to `~/.serialio/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".serialio").join("config.toml")
}

/// Load the config file at `path`.  Returns `None` if it does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Split a comma-separated device list, dropping empty entries.
pub fn split_devices(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

/// Apply `SERIALIO_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `SERIALIO_HOST` | `host` |
/// | `SERIALIO_PORT` | `port` |
/// | `SERIALIO_DEVICES` | `devices` (comma-separated) |
/// | `SERIALIO_DEVICE_ROOT` | `device_root` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SERIALIO_HOST")
        && !v.is_empty()
    {
        cfg.host = v;
    }
    if let Ok(v) = std::env::var("SERIALIO_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.port = port;
    }
    if let Ok(v) = std::env::var("SERIALIO_DEVICES") {
        let devices = split_devices(&v);
        if !devices.is_empty() {
            cfg.devices = devices;
        }
    }
    if let Ok(v) = std::env::var("SERIALIO_DEVICE_ROOT")
        && !v.is_empty()
    {
        cfg.device_root = v;
    }
}

/// Apply command-line overrides to `cfg`.
pub fn apply_overrides(cfg: &mut Config, overrides: Overrides) {
    if let Some(host) = overrides.host {
        cfg.host = host;
    }
    if let Some(port) = overrides.port {
        cfg.port = port;
    }
    if !overrides.devices.is_empty() {
        cfg.devices = overrides.devices;
    }
    if let Some(root) = overrides.device_root {
        cfg.device_root = root;
    }
}

/// Build the effective configuration.
pub fn resolve(path: &Path, overrides: Overrides) -> Result<Config, String> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    apply_overrides(&mut cfg, overrides);
    Ok(cfg)
}
