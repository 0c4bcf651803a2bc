//! [`Launcher`] – runs a fleet of routers for the lifetime of the process.
//!
//! 1. Each requested device is added to the registry set, then its
//!    [`Router`] is opened.  The first failure aborts the whole launch.
//! 2. The service name is claimed through the [`NameService`].
//! 3. While any router is alive the name is refreshed every
//!    `heartbeat_interval`.
//! 4. Once all routers are down, or as soon as one of them reports a
//!    [`Router::failure`], every requested device is removed from the
//!    registry set.  A router failure fails the launch so a supervisor can
//!    start the fleet again.
//!
//! Registry membership follows the process, not individual routers: a router
//! that shuts down while others keep running stays listed until the whole
//! fleet stops.

use std::sync::Arc;
use std::time::Duration;

use serialio_hal::{DEFAULT_DEVICE_ROOT, LinkOpener, device_path};
use serialio_middleware::{ConfigSource, MessageBus, MilestoneLog, NameService};
use serialio_types::{REGISTRY_SET, SerialIoError};
use tracing::{info, warn};

use crate::router::{Router, RouterContext};

/// Logical name the process advertises while routers are running.
pub const DEFAULT_SERVICE_NAME: &str = "SerialIOService";

/// What to launch.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub devices: Vec<String>,
    pub device_root: String,
    pub service_name: String,
    pub heartbeat_interval: Duration,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            devices: vec!["ttyUSB".to_string()],
            device_root: DEFAULT_DEVICE_ROOT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            heartbeat_interval: Duration::from_secs(1),
        }
    }
}

/// Starts routers and keeps the service name alive while they run.
pub struct Launcher {
    bus: Arc<dyn MessageBus>,
    config: Arc<dyn ConfigSource>,
    opener: Arc<dyn LinkOpener>,
    names: Arc<dyn NameService>,
    log: MilestoneLog,
}

impl Launcher {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        config: Arc<dyn ConfigSource>,
        opener: Arc<dyn LinkOpener>,
        names: Arc<dyn NameService>,
    ) -> Self {
        let log = MilestoneLog::new(DEFAULT_SERVICE_NAME).with_bus(Arc::clone(&bus));
        Self {
            bus,
            config,
            opener,
            names,
            log,
        }
    }

    /// Run one launch attempt to completion.
    ///
    /// Returns `Ok(())` once every router has shut down and the registry has
    /// been cleared.
    ///
    /// # Errors
    ///
    /// Any registry, router-open, or heartbeat failure.  Devices added to the
    /// registry before the failure are left there; the next attempt adds
    /// them again.
    ///
    /// A router that loses a bus subscription stops the whole fleet: the
    /// remaining routers are dropped, the registry is cleared, and the loss
    /// is returned as [`SerialIoError::Bus`].
    pub async fn launch(&self, config: &LauncherConfig) -> Result<(), SerialIoError> {
        self.log.record("IO Service initiating...").await;

        let ctx = RouterContext {
            bus: Arc::clone(&self.bus),
            config: Arc::clone(&self.config),
            opener: Arc::clone(&self.opener),
            device_root: config.device_root.clone(),
        };

        let mut routers = Vec::with_capacity(config.devices.len());
        for device in &config.devices {
            self.bus.set_add(REGISTRY_SET, device).await?;
            self.log
                .record(format!(
                    "Try to start router on {} ...",
                    device_path(&config.device_root, device)
                ))
                .await;
            routers.push(Router::open(ctx.clone(), device).await?);
        }

        let mut token = self.names.hold_name(&config.service_name).await?;
        info!(service = token.name(), routers = routers.len(), "service name held");

        while routers.iter().any(Router::is_alive) {
            if routers.iter().any(|r| r.failure().is_some()) {
                break;
            }
            token.update().await?;
            tokio::time::sleep(config.heartbeat_interval).await;
        }
        let failure = routers.iter().find_map(Router::failure);
        if let Some(e) = &failure {
            warn!(error = %e, "router failed; stopping the fleet");
        }
        drop(routers);

        let mut first_error = None;
        for device in &config.devices {
            if let Err(e) = self.bus.set_remove(REGISTRY_SET, device).await {
                warn!(device = %device, error = %e, "registry removal failed");
                first_error.get_or_insert(e);
            }
        }
        self.log.record("IO Service stopped.").await;

        match failure.or(first_error) {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
