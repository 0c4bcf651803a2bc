//! `serialio` – serial port I/O service.
//!
//! Bridges local serial devices to Redis channels
//! `serial_ports/<device>/{read,write,command}`.  The binary:
//!
//! 1. Resolves configuration from flags, `SERIALIO_*` variables and
//!    `~/.serialio/config.toml`.
//! 2. Runs the launcher under a fixed-delay restart supervisor: any failure
//!    is logged and the whole launch is retried one second later.
//! 3. On the first **Ctrl-C** publishes `shutdown` to every routed device so
//!    the launcher exits cleanly and clears the registry.  A second Ctrl-C
//!    exits immediately.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::Parser;
use colored::Colorize;
use serialio_hal::SerialPortOpener;
use serialio_middleware::{MessageBus, RedisBus};
use serialio_runtime::{Launcher, LauncherConfig, RESTART_DELAY, init_tracing, supervise};
use serialio_types::{COMMAND_SHUTDOWN, DeviceChannels, SerialIoError};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Bridge serial port devices to a Redis message bus.
#[derive(Parser, Debug)]
#[command(name = "serialio", version, about, long_about = None)]
struct Args {
    /// Redis host [default: 127.0.0.1]
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Redis port [default: 6379]
    #[arg(short, long)]
    port: Option<u16>,

    /// Device name under the device root; repeat or comma-separate [default: ttyUSB]
    #[arg(short, long = "device", value_delimiter = ',')]
    devices: Vec<String>,

    /// Directory holding device nodes [default: /dev]
    #[arg(long)]
    device_root: Option<String>,

    /// Config file [default: ~/.serialio/config.toml]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not print the startup banner
    #[arg(long)]
    no_banner: bool,
}

fn main() {
    let args = Args::parse();
    let _guard = init_tracing("serialio");

    let path = args.config.clone().unwrap_or_else(config::config_path);
    let overrides = config::Overrides {
        host: args.host,
        port: args.port,
        devices: args
            .devices
            .iter()
            .flat_map(|d| config::split_devices(d))
            .collect(),
        device_root: args.device_root,
    };
    let cfg = match config::resolve(&path, overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            std::process::exit(2);
        }
    };

    if !args.no_banner {
        print_banner(&cfg);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            std::process::exit(1);
        }
    };
    runtime.block_on(run(cfg));
}

async fn run(cfg: config::Config) {
    // ── Ctrl-C ────────────────────────────────────────────────────────────
    let (stop_tx, stop_rx) = mpsc::unbounded_channel();
    let presses = AtomicUsize::new(0);
    if let Err(e) = ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) == 0 {
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down routers …".yellow().bold());
            let _ = stop_tx.send(());
        } else {
            println!("{}", "  Exiting immediately.".red());
            std::process::exit(130);
        }
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; shut routers down over the bus instead");
    }
    tokio::spawn(request_shutdown(cfg.clone(), stop_rx));

    // ── Supervised launch ─────────────────────────────────────────────────
    let launch_config = LauncherConfig {
        devices: cfg.devices.clone(),
        device_root: cfg.device_root.clone(),
        ..LauncherConfig::default()
    };
    let cfg = &cfg;
    let launch_config = &launch_config;
    supervise(
        move || async move {
            let bus = Arc::new(
                RedisBus::connect(&cfg.host, cfg.port)
                    .await
                    .map_err(SerialIoError::from)?,
            );
            let launcher = Launcher::new(
                bus.clone(),
                Arc::new(bus.config_source()),
                Arc::new(SerialPortOpener::new()),
                Arc::new(bus.name_service()),
            );
            launcher.launch(launch_config).await
        },
        RESTART_DELAY,
    )
    .await;

    info!("serialio exiting");
}

/// Wait for the first Ctrl-C, then ask every configured router to stop.
async fn request_shutdown(cfg: config::Config, mut stop: mpsc::UnboundedReceiver<()>) {
    if stop.recv().await.is_none() {
        return;
    }
    let bus = match RedisBus::connect(&cfg.host, cfg.port).await {
        Ok(bus) => bus,
        Err(e) => {
            warn!(error = %e, "cannot reach bus to request shutdown; press Ctrl-C again to exit");
            return;
        }
    };
    for device in &cfg.devices {
        let channel = DeviceChannels::new(device).command;
        match bus.publish(&channel, COMMAND_SHUTDOWN.as_bytes()).await {
            Ok(_) => println!("{} {}", "  ✓ shutdown sent to".green(), device.bold()),
            Err(e) => warn!(device = %device, error = %e, "shutdown request not published"),
        }
    }
}

fn print_banner(cfg: &config::Config) {
    println!();
    println!("  {} {}",
        "SerialIO".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Serial port ⇄ message bus bridge");
    println!();
    println!("  Redis    {}", format!("{}:{}", cfg.host, cfg.port).bold());
    println!("  Devices  {}", cfg.devices.join(", ").bold());
    println!("  Root     {}", cfg.device_root.dimmed());
    println!();
}
