//! `serialio-middleware` – bus plumbing shared by routers and clients.
//!
//! Moves opaque byte messages between named channels and knows nothing about
//! serial framing.
//!
//! # Modules
//!
//! - [`bus`] – the [`MessageBus`] seam and the in-process [`MemoryBus`] built
//!   on Tokio broadcast channels.
//! - [`redis_backend`] – [`RedisBus`] plus the Redis-backed configuration and
//!   name services.
//! - [`config_source`] – per-device key/value configuration lookup.
//! - [`heartbeat`] – service-name registration with periodic refresh.
//! - [`milestone`] – lifecycle notes, logged and optionally published.
//! - [`client`] – [`BusClient`], the consumer-side device handle.

pub mod bus;
pub mod client;
pub mod config_source;
pub mod heartbeat;
pub mod milestone;
pub mod redis_backend;

pub use bus::{MemoryBus, MessageBus, Subscription};
pub use client::{BusClient, BytesHandler, INBOX_CAPACITY};
pub use config_source::{ConfigSource, StaticConfigSource, load_link_settings};
pub use heartbeat::{MemoryNameService, NameHealth, NameRegistry, NameService, NameToken};
pub use milestone::{MILESTONE_CHANNEL, Milestone, MilestoneLog};
pub use redis_backend::{RedisBus, RedisConfigSource, RedisNameService};
