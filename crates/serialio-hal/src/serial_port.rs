//! Hardware serial driver on top of the `serialport` crate.
//!
//! [`LinkSettings`] covers a wider vocabulary than the portable driver.  Values
//! without a direct counterpart are mapped to the nearest supported one and a
//! warning is logged; the device is still opened.
//!
//! The port timeout only bounds how long a read waits.  Writes wait as long
//! as the peer's flow control holds them off: a timed-out write is retried
//! from the first unsent byte, so a payload is never cut short.

use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;

use serialio_types::{DataBits, Handshake, HalError, LinkSettings, Parity, StopBits};
use serialport::{FlowControl, SerialPort};
use tracing::{debug, trace, warn};

use crate::link::{LinkOpener, SerialLink};

/// Upper bound on a single read chunk.
const READ_BUFFER: usize = 4096;

/// Default poll window for [`SerialLink::read_chunk`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn is_retryable(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock)
}

/// Write every byte of `bytes` and flush, retrying timeouts.
fn write_fully<W: Write + ?Sized>(writer: &mut W, mut bytes: &[u8]) -> io::Result<()> {
    while !bytes.is_empty() {
        match writer.write(bytes) {
            Ok(0) => {
                return Err(io::Error::new(ErrorKind::WriteZero, "serial port accepted no bytes"));
            }
            Ok(n) => bytes = &bytes[n..],
            Err(e) if is_retryable(&e) => {
                trace!(pending = bytes.len(), "serial write held off; retrying");
            }
            Err(e) => return Err(e),
        }
    }
    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(e) if is_retryable(&e) => {}
            Err(e) => return Err(e),
        }
    }
}

fn to_data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn to_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Space | Parity::Mark => {
            warn!(%parity, "parity not supported by driver, using None");
            serialport::Parity::None
        }
    }
}

fn to_stop_bits(stop_bits: StopBits) -> serialport::StopBits {
    match stop_bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
        StopBits::None | StopBits::OnePointFive => {
            warn!(%stop_bits, "stop bits not supported by driver, using One");
            serialport::StopBits::One
        }
    }
}

fn to_flow_control(handshake: Handshake) -> FlowControl {
    match handshake {
        Handshake::None => FlowControl::None,
        Handshake::XOnXOff => FlowControl::Software,
        Handshake::RequestToSend => FlowControl::Hardware,
        Handshake::RequestToSendXOnXOff => {
            warn!(%handshake, "combined handshake not supported by driver, using RTS/CTS");
            FlowControl::Hardware
        }
    }
}

/// Opens real serial devices.
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    poll_interval: Duration,
}

impl SerialPortOpener {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override how long a read waits before reporting an idle window.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for SerialPortOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkOpener for SerialPortOpener {
    fn open(&self, path: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>, HalError> {
        let port = serialport::new(path, settings.baud_rate)
            .data_bits(to_data_bits(settings.data_bits))
            .parity(to_parity(settings.parity))
            .stop_bits(to_stop_bits(settings.stop_bits))
            .flow_control(to_flow_control(settings.handshake))
            .timeout(self.poll_interval)
            .open()
            .map_err(|e| HalError::Unavailable {
                path: path.to_string(),
                details: e.to_string(),
            })?;
        debug!(path, %settings, "serial port opened");
        Ok(Box::new(SerialPortLink {
            path: path.to_string(),
            port: Some(port),
        }))
    }
}

/// A device opened through [`SerialPortOpener`].
pub struct SerialPortLink {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortLink {
    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, HalError> {
        let path = &self.path;
        self.port
            .as_mut()
            .ok_or_else(|| HalError::Closed { path: path.clone() })
    }
}

impl SerialLink for SerialPortLink {
    fn path(&self) -> &str {
        &self.path
    }

    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, HalError> {
        let port = self.port_mut()?;
        let mut buf = vec![0u8; READ_BUFFER];
        match port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                Ok(None)
            }
            Err(e) => Err(HalError::Io(e)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        let port = self.port_mut()?;
        write_fully(port.as_mut(), bytes)?;
        Ok(())
    }

    fn try_clone_link(&self) -> Result<Box<dyn SerialLink>, HalError> {
        let port = self.port.as_ref().ok_or_else(|| HalError::Closed {
            path: self.path.clone(),
        })?;
        let clone = port.try_clone().map_err(|e| HalError::Unavailable {
            path: self.path.clone(),
            details: e.to_string(),
        })?;
        Ok(Box::new(SerialPortLink {
            path: self.path.clone(),
            port: Some(clone),
        }))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(path = %self.path, "serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
