#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serialio_hal::SimOpener;
use serialio_middleware::{MemoryBus, StaticConfigSource};
use serialio_runtime::RouterContext;

/// In-process rig: one bus, one config table, simulated devices under `/dev`.
pub struct Rig {
    pub bus: MemoryBus,
    pub config: StaticConfigSource,
    pub opener: Arc<SimOpener>,
}

impl Rig {
    pub fn new() -> Self {
        Self {
            bus: MemoryBus::default(),
            config: StaticConfigSource::new(),
            opener: Arc::new(SimOpener::new()),
        }
    }

    pub fn context(&self) -> RouterContext {
        RouterContext {
            bus: Arc::new(self.bus.clone()),
            config: Arc::new(self.config.clone()),
            opener: self.opener.clone(),
            device_root: "/dev".to_string(),
        }
    }
}

/// Poll `condition` every few milliseconds until it holds or two seconds pass.
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `future`, failing the test after two seconds.
pub async fn within<T>(what: &str, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}
