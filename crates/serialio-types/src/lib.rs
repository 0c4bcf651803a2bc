//! `serialio-types` – shared vocabulary for the serial I/O bridge.
//!
//! # Modules
//!
//! - [`settings`] – [`LinkSettings`] and the permissive parsers that turn
//!   configuration text into framing parameters.
//! - [`channels`] – bus channel naming, registry set name, and the router
//!   command table.
//! - [`latin1`] – one-byte-per-character text mapping used by clients.
//! - [`error`] – error enums for every layer.

pub mod channels;
pub mod error;
pub mod latin1;
pub mod settings;

pub use channels::{COMMAND_SHUTDOWN, Command, DeviceChannels, NAMESPACE, REGISTRY_SET};
pub use error::{BusError, ConfigError, HalError, SerialIoError};
pub use settings::{DataBits, Handshake, LinkSettings, Parity, StopBits};
