//! `serialio-hal` – serial device access.
//!
//! # Modules
//!
//! - [`link`] – the [`SerialLink`] / [`LinkOpener`] seams and device path
//!   helpers.
//! - [`serial_port`] – hardware driver on the `serialport` crate.
//! - [`sim`] – in-process simulated devices for tests without hardware.

pub mod link;
pub mod serial_port;
pub mod sim;

pub use link::{DEFAULT_DEVICE_ROOT, LinkOpener, SerialLink, device_path};
pub use serial_port::{SerialPortLink, SerialPortOpener};
pub use sim::{SimDevice, SimLink, SimOpener};
