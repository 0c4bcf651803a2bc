//! Bus naming convention shared by routers and clients.
//!
//! Channel names are derived from the device name alone; nothing is
//! allocated or negotiated between the two ends.

/// Prefix of every per-device channel.
pub const NAMESPACE: &str = "serial_ports";

/// Shared set holding the names of currently routed devices.
pub const REGISTRY_SET: &str = "serial_ports";

/// The only command a router currently acts on.
pub const COMMAND_SHUTDOWN: &str = "shutdown";

/// The three channel names belonging to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChannels {
    pub read: String,
    pub write: String,
    pub command: String,
}

impl DeviceChannels {
    pub fn new(device: &str) -> Self {
        Self {
            read: format!("{NAMESPACE}/{device}/read"),
            write: format!("{NAMESPACE}/{device}/write"),
            command: format!("{NAMESPACE}/{device}/command"),
        }
    }
}

/// A command string received on a device's command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Shutdown,
    /// Anything else; accepted and ignored.
    Unknown(String),
}

impl Command {
    /// Exact, case-sensitive match against the command table.
    pub fn parse(text: &str) -> Self {
        match text {
            COMMAND_SHUTDOWN => Command::Shutdown,
            other => Command::Unknown(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_follow_namespace_convention() {
        let ch = DeviceChannels::new("ttyUSB0");
        assert_eq!(ch.read, "serial_ports/ttyUSB0/read");
        assert_eq!(ch.write, "serial_ports/ttyUSB0/write");
        assert_eq!(ch.command, "serial_ports/ttyUSB0/command");
    }

    #[test]
    fn only_exact_shutdown_is_recognised() {
        assert_eq!(Command::parse("shutdown"), Command::Shutdown);
        assert_eq!(Command::parse("Shutdown"), Command::Unknown("Shutdown".into()));
        assert_eq!(Command::parse("shutdown "), Command::Unknown("shutdown ".into()));
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
    }
}
