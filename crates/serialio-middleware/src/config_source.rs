//! Per-device configuration lookup.
//!
//! Each device owns a flat string → string map.  Only the five link keys are
//! read today (see [`serialio_types::settings::keys`]).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serialio_types::settings::keys;
use serialio_types::{ConfigError, LinkSettings};
use tracing::debug;

/// Key/value configuration collaborator.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetch `key` for `device`.  `Ok(None)` when the key is not set.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Unreachable`] when the backing service cannot be asked.
    async fn get(&self, device: &str, key: &str) -> Result<Option<String>, ConfigError>;
}

/// Fetch and decode the link settings for `device`.
///
/// Missing keys take their documented defaults; values that do not parse
/// leave the default in place.  Only an unreachable source is an error.
pub async fn load_link_settings(
    source: &dyn ConfigSource,
    device: &str,
) -> Result<LinkSettings, ConfigError> {
    let mut values = HashMap::with_capacity(keys::ALL.len());
    for (key, default) in keys::ALL {
        let value = source
            .get(device, key)
            .await?
            .unwrap_or_else(|| default.to_string());
        values.insert(key, value);
    }
    let settings = LinkSettings::from_lookup(|key, default| {
        values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    });
    debug!(device, %settings, "link settings resolved");
    Ok(settings)
}

/// In-memory configuration, shared between clones.
#[derive(Clone, Debug, Default)]
pub struct StaticConfigSource {
    values: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl StaticConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`StaticConfigSource::set`].
    pub fn with(self, device: &str, key: &str, value: &str) -> Self {
        self.set(device, key, value);
        self
    }

    pub fn set(&self, device: &str, key: &str, value: &str) {
        if let Ok(mut values) = self.values.write() {
            values.insert((device.to_string(), key.to_string()), value.to_string());
        }
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn get(&self, device: &str, key: &str) -> Result<Option<String>, ConfigError> {
        let values = self
            .values
            .read()
            .map_err(|e| ConfigError::Unreachable(format!("config table poisoned: {e}")))?;
        Ok(values.get(&(device.to_string(), key.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialio_types::{DataBits, Handshake, Parity, StopBits};

    struct OfflineSource;

    #[async_trait]
    impl ConfigSource for OfflineSource {
        async fn get(&self, _device: &str, _key: &str) -> Result<Option<String>, ConfigError> {
            Err(ConfigError::Unreachable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn empty_source_yields_defaults() {
        let settings = load_link_settings(&StaticConfigSource::new(), "ttyUSB0")
            .await
            .unwrap();
        assert_eq!(settings, LinkSettings::default());
    }

    #[tokio::test]
    async fn configured_values_are_applied_per_device() {
        let source = StaticConfigSource::new()
            .with("ttyUSB0", "baud_rate", "9600")
            .with("ttyUSB0", "data_bits", "7")
            .with("ttyUSB0", "parity", "Even")
            .with("ttyUSB0", "stop_bits", "Two")
            .with("ttyUSB0", "handshake", "RequestToSend")
            .with("ttyUSB1", "baud_rate", "57600");

        let s0 = load_link_settings(&source, "ttyUSB0").await.unwrap();
        assert_eq!(s0.baud_rate, 9600);
        assert_eq!(s0.data_bits, DataBits::Seven);
        assert_eq!(s0.parity, Parity::Even);
        assert_eq!(s0.stop_bits, StopBits::Two);
        assert_eq!(s0.handshake, Handshake::RequestToSend);

        let s1 = load_link_settings(&source, "ttyUSB1").await.unwrap();
        assert_eq!(s1.baud_rate, 57600);
        assert_eq!(s1.parity, Parity::None);
    }

    #[tokio::test]
    async fn unrecognised_values_fall_back_silently() {
        let source = StaticConfigSource::new()
            .with("ttyS0", "parity", "even")
            .with("ttyS0", "baud_rate", "lots");
        let settings = load_link_settings(&source, "ttyS0").await.unwrap();
        assert_eq!(settings, LinkSettings::default());
    }

    #[tokio::test]
    async fn unreachable_source_is_an_error() {
        let result = load_link_settings(&OfflineSource, "ttyUSB0").await;
        assert!(matches!(result, Err(ConfigError::Unreachable(_))));
    }
}
