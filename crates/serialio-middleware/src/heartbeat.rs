//! Service-name registration with periodic refresh.
//!
//! A process holds a logical name (e.g. `"SerialIOService"`) through a
//! [`NameToken`] and must call [`NameToken::update`] more often than the
//! backend's expiry, otherwise observers consider the service gone.
//!
//! [`NameRegistry`] is the in-process bookkeeping: it records the timestamp of
//! each refresh and reports a name as [`NameHealth::Expired`] once its timeout
//! has elapsed.  [`MemoryNameService`] exposes it through the
//! [`NameService`] seam.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serialio_types::SerialIoError;
use tracing::debug;

/// Registers logical service names.
#[async_trait]
pub trait NameService: Send + Sync {
    /// Claim `name` and return the token that keeps it alive.
    async fn hold_name(&self, name: &str) -> Result<Box<dyn NameToken>, SerialIoError>;
}

/// A held service name.
#[async_trait]
pub trait NameToken: Send {
    fn name(&self) -> &str;

    /// Refresh the registration, resetting its expiry.
    async fn update(&mut self) -> Result<(), SerialIoError>;
}

// ────────────────────────────────────────────────────────────────────────────
// NameRegistry
// ────────────────────────────────────────────────────────────────────────────

/// Liveness of a held name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameHealth {
    /// Refreshed within its timeout.
    Alive,
    /// Not refreshed within its timeout, or never held.
    Expired,
}

struct NameEntry {
    last_refresh: Instant,
    timeout: Duration,
}

/// Tracks refreshes of held names.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use serialio_middleware::heartbeat::{NameHealth, NameRegistry};
///
/// let mut names = NameRegistry::new();
/// names.hold("SerialIOService", Duration::from_secs(3));
/// names.refresh("SerialIOService");
///
/// assert_eq!(names.health("SerialIOService"), NameHealth::Alive);
/// ```
#[derive(Default)]
pub struct NameRegistry {
    names: HashMap<String, NameEntry>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `name` with the given refresh `timeout`.
    ///
    /// Holding an already-held name resets its deadline.
    pub fn hold(&mut self, name: &str, timeout: Duration) {
        self.names.insert(
            name.to_string(),
            NameEntry {
                last_refresh: Instant::now(),
                timeout,
            },
        );
    }

    /// Reset the deadline of `name`.  No-op for names not held.
    pub fn refresh(&mut self, name: &str) {
        if let Some(entry) = self.names.get_mut(name) {
            entry.last_refresh = Instant::now();
        }
    }

    pub fn health(&self, name: &str) -> NameHealth {
        match self.names.get(name) {
            Some(entry) if entry.last_refresh.elapsed() <= entry.timeout => NameHealth::Alive,
            _ => NameHealth::Expired,
        }
    }

    /// Stop tracking `name`.  Returns `true` if it was held.
    pub fn release(&mut self, name: &str) -> bool {
        self.names.remove(name).is_some()
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Names whose deadline has passed.  Order is unspecified.
    pub fn expired(&self) -> Vec<String> {
        self.names
            .iter()
            .filter(|(_, entry)| entry.last_refresh.elapsed() > entry.timeout)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MemoryNameService
// ────────────────────────────────────────────────────────────────────────────

/// [`NameService`] backed by a shared [`NameRegistry`].
#[derive(Clone)]
pub struct MemoryNameService {
    registry: Arc<Mutex<NameRegistry>>,
    timeout: Duration,
}

impl MemoryNameService {
    pub fn new(timeout: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(NameRegistry::new())),
            timeout,
        }
    }

    pub fn health(&self, name: &str) -> NameHealth {
        self.registry
            .lock()
            .map(|registry| registry.health(name))
            .unwrap_or(NameHealth::Expired)
    }

    /// `true` while `name` is tracked, expired or not.
    pub fn is_held(&self, name: &str) -> bool {
        self.registry
            .lock()
            .map(|registry| registry.is_held(name))
            .unwrap_or(false)
    }
}

impl Default for MemoryNameService {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl NameService for MemoryNameService {
    async fn hold_name(&self, name: &str) -> Result<Box<dyn NameToken>, SerialIoError> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|e| SerialIoError::Heartbeat(format!("name registry poisoned: {e}")))?;
        // Expired names would otherwise accumulate, like keys past their TTL.
        for stale in registry.expired() {
            debug!(name = %stale, "dropping expired service name");
            registry.release(&stale);
        }
        registry.hold(name, self.timeout);
        drop(registry);
        Ok(Box::new(MemoryNameToken {
            name: name.to_string(),
            registry: Arc::clone(&self.registry),
        }))
    }
}

struct MemoryNameToken {
    name: String,
    registry: Arc<Mutex<NameRegistry>>,
}

#[async_trait]
impl NameToken for MemoryNameToken {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update(&mut self) -> Result<(), SerialIoError> {
        self.registry
            .lock()
            .map_err(|e| SerialIoError::Heartbeat(format!("name registry poisoned: {e}")))?
            .refresh(&self.name);
        Ok(())
    }
}
