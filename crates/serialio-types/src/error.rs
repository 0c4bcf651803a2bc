use thiserror::Error;

/// Failures reported by a message bus backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("bus connection is down")]
    Disconnected,

    #[error("bus backend error: {0}")]
    Backend(String),

    #[error("subscription to {0} ended")]
    SubscriptionLost(String),
}

/// Failures fetching per-device configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration service unreachable: {0}")]
    Unreachable(String),
}

/// Failures talking to the physical serial device.
#[derive(Error, Debug)]
pub enum HalError {
    #[error("serial device {path} unavailable: {details}")]
    Unavailable { path: String, details: String },

    #[error("serial device {path} is closed")]
    Closed { path: String },

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error crossing component boundaries.
///
/// Routers surface these from construction.  Once a router is online its
/// errors are absorbed locally, except a lost subscription, which
/// the router reports as its failure.
#[derive(Error, Debug)]
pub enum SerialIoError {
    #[error("Message Bus Error: {0}")]
    Bus(#[from] BusError),

    #[error("Configuration Error: {0}")]
    Config(#[from] ConfigError),

    #[error("Device Error: {0}")]
    Device(#[from] HalError),

    #[error("Target serial port device {device} is unavailable.")]
    DeviceUnavailable { device: String },

    #[error("Heartbeat Error: {0}")]
    Heartbeat(String),

    #[error("Task Error: {0}")]
    Join(String),
}
