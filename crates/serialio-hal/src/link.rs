//! Generic serial link traits.

use serialio_types::{HalError, LinkSettings};

/// Directory device nodes live under unless configured otherwise.
pub const DEFAULT_DEVICE_ROOT: &str = "/dev";

/// Full path of device `name` under `root`, e.g. `/dev/ttyUSB0`.
pub fn device_path(root: &str, name: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), name)
}

/// An open, byte-oriented serial device.
///
/// Implementations are driven from blocking threads; none of these methods
/// may be called from inside an async task without `spawn_blocking`.
pub trait SerialLink: Send {
    /// Path the link was opened on, e.g. `"/dev/ttyUSB0"`.
    fn path(&self) -> &str;

    /// Wait for the next readable chunk.
    ///
    /// Blocks until the driver reports bytes or its poll window lapses.
    /// Returns everything currently available as one chunk, or `None` when
    /// the window lapsed with nothing to read.
    ///
    /// # Errors
    ///
    /// [`HalError::Closed`] once the link has been closed, [`HalError::Io`]
    /// for driver failures.
    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, HalError>;

    /// Write every byte of `bytes`, in order.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), HalError>;

    /// A second handle on the same device, used to read and write from
    /// different threads.
    fn try_clone_link(&self) -> Result<Box<dyn SerialLink>, HalError>;

    /// Release the device.  Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens serial devices by path.
pub trait LinkOpener: Send + Sync {
    /// Open `path` configured with `settings`.
    ///
    /// # Errors
    ///
    /// [`HalError::Unavailable`] when the device node is missing, busy or
    /// rejects the requested parameters.
    fn open(&self, path: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>, HalError>;
}
