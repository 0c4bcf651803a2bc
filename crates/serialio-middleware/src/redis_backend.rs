//! Redis-backed implementations of the middleware seams.
//!
//! One [`RedisBus`] owns a [`ConnectionManager`] for commands and opens a
//! dedicated pub/sub connection per [`MessageBus::subscribe`] call, so each
//! subscription has its own delivery order and can be dropped on its own.
//!
//! | Type | Redis usage |
//! |---|---|
//! | [`RedisBus`] | `PUBLISH`, `SUBSCRIBE`, `SADD`, `SREM`, `SISMEMBER`, `PING` |
//! | [`RedisConfigSource`] | `HGET configurations/<device> <key>` |
//! | [`RedisNameService`] | `SET services/<name> <token> EX <ttl>` |

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use serialio_types::{BusError, ConfigError, SerialIoError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{MessageBus, Subscription};
use crate::config_source::ConfigSource;
use crate::heartbeat::{NameService, NameToken};

/// Build the connection URL for a Redis server.
pub fn redis_url(host: &str, port: u16) -> String {
    format!("redis://{host}:{port}/")
}

fn is_connection_failure(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

// ---------------------------------------------------------------------------
// RedisBus
// ---------------------------------------------------------------------------

/// [`MessageBus`] on top of a Redis server.
pub struct RedisBus {
    client: Client,
    manager: ConnectionManager,
    address: String,
    connected: AtomicBool,
}

impl RedisBus {
    /// Connect to the Redis server at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Backend`] when the URL is invalid or the server
    /// cannot be reached.  Callers treat this as fatal.
    pub async fn connect(host: &str, port: u16) -> Result<Self, BusError> {
        let address = format!("{host}:{port}");
        let client = Client::open(redis_url(host, port))
            .map_err(|e| BusError::Backend(format!("invalid redis address {address}: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| BusError::Backend(format!("cannot connect to redis at {address}: {e}")))?;
        debug!(%address, "redis bus connected");
        Ok(Self {
            client,
            manager,
            address,
            connected: AtomicBool::new(true),
        })
    }

    /// `host:port` of the server.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// A configuration source sharing this bus's command connection.
    pub fn config_source(&self) -> RedisConfigSource {
        RedisConfigSource {
            manager: self.manager.clone(),
        }
    }

    /// A name service sharing this bus's command connection.
    pub fn name_service(&self) -> RedisNameService {
        RedisNameService::new(self.manager.clone())
    }

    fn map_err(&self, e: RedisError) -> BusError {
        if is_connection_failure(&e) {
            self.connected.store(false, Ordering::Release);
            BusError::Disconnected
        } else {
            BusError::Backend(e.to_string())
        }
    }

    fn mark_ok<T>(&self, value: T) -> T {
        self.connected.store(true, Ordering::Release);
        value
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, BusError> {
        let mut conn = self.manager.clone();
        let receivers: usize = conn
            .publish(channel, payload)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(self.mark_ok(receivers))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| self.map_err(e))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| self.map_err(e))?;
        let messages = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec());
        Ok(self.mark_ok(Subscription::new(channel, messages.boxed())))
    }

    async fn is_connected(&self) -> bool {
        if self.connected.load(Ordering::Acquire) {
            return true;
        }
        // Re-probe so a recovered server is noticed without a publish.
        let mut conn = self.manager.clone();
        let alive = redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok();
        self.connected.store(alive, Ordering::Release);
        alive
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<bool, BusError> {
        let mut conn = self.manager.clone();
        let added: usize = conn.sadd(set, member).await.map_err(|e| self.map_err(e))?;
        Ok(self.mark_ok(added > 0))
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<bool, BusError> {
        let mut conn = self.manager.clone();
        let removed: usize = conn.srem(set, member).await.map_err(|e| self.map_err(e))?;
        Ok(self.mark_ok(removed > 0))
    }

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool, BusError> {
        let mut conn = self.manager.clone();
        let present: bool = conn
            .sismember(set, member)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(self.mark_ok(present))
    }

    fn describe(&self) -> String {
        format!("Redis server on {}", self.address)
    }
}

// ---------------------------------------------------------------------------
// RedisConfigSource
// ---------------------------------------------------------------------------

/// Per-device settings stored in the hash `configurations/<device>`.
#[derive(Clone)]
pub struct RedisConfigSource {
    manager: ConnectionManager,
}

impl RedisConfigSource {
    pub fn hash_key(device: &str) -> String {
        format!("configurations/{device}")
    }
}

#[async_trait]
impl ConfigSource for RedisConfigSource {
    async fn get(&self, device: &str, key: &str) -> Result<Option<String>, ConfigError> {
        let mut conn = self.manager.clone();
        conn.hget(Self::hash_key(device), key)
            .await
            .map_err(|e| ConfigError::Unreachable(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// RedisNameService
// ---------------------------------------------------------------------------

/// Expiry of a held name; three missed one-second refreshes lose the name.
pub const DEFAULT_NAME_TTL: Duration = Duration::from_secs(3);

/// Service discovery by expiring keys under `services/<name>`.
#[derive(Clone)]
pub struct RedisNameService {
    manager: ConnectionManager,
    ttl: Duration,
}

impl RedisNameService {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            ttl: DEFAULT_NAME_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn key(name: &str) -> String {
        format!("services/{name}")
    }
}

#[async_trait]
impl NameService for RedisNameService {
    async fn hold_name(&self, name: &str) -> Result<Box<dyn NameToken>, SerialIoError> {
        let mut token = RedisNameToken {
            name: name.to_string(),
            key: Self::key(name),
            id: Uuid::new_v4().to_string(),
            ttl_secs: self.ttl.as_secs().max(1),
            manager: self.manager.clone(),
        };
        token.update().await?;
        Ok(Box::new(token))
    }
}

struct RedisNameToken {
    name: String,
    key: String,
    id: String,
    ttl_secs: u64,
    manager: ConnectionManager,
}

#[async_trait]
impl NameToken for RedisNameToken {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update(&mut self) -> Result<(), SerialIoError> {
        let result: Result<(), RedisError> =
            self.manager.set_ex(&self.key, &self.id, self.ttl_secs).await;
        result.map_err(|e| {
            warn!(name = %self.name, error = %e, "failed to refresh service name");
            SerialIoError::Heartbeat(format!("refresh of {} failed: {e}", self.name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_and_key_layout() {
        assert_eq!(redis_url("127.0.0.1", 6379), "redis://127.0.0.1:6379/");
        assert_eq!(RedisConfigSource::hash_key("ttyUSB0"), "configurations/ttyUSB0");
        assert_eq!(RedisNameService::key("SerialIOService"), "services/SerialIOService");
    }

    #[tokio::test]
    async fn connect_to_unreachable_server_fails() {
        // Port 1 is reserved and never runs redis.
        let result = RedisBus::connect("127.0.0.1", 1).await;
        assert!(matches!(result, Err(BusError::Backend(_))));
    }
}
