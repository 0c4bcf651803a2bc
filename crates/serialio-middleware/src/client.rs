//! [`BusClient`] – consumer-side access to a routed serial device.
//!
//! A client never touches hardware.  It checks that the device is listed in
//! the registry set, listens on the device's `read` channel, and publishes to
//! its `write` and `command` channels.  Everything is fire-and-forget: there
//! is no acknowledgement and no way to learn whether a write reached the
//! device.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serialio_middleware::{BusClient, MemoryBus};
//!
//! # async fn demo() -> Result<(), serialio_types::SerialIoError> {
//! let bus = Arc::new(MemoryBus::default());
//! let client = BusClient::connect_with_handler(bus, "ttyUSB0", |bytes: &[u8]| {
//!     println!("device said {bytes:?}");
//! })
//! .await?;
//! client.send_text("AT\r\n").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};

use serialio_types::{DeviceChannels, REGISTRY_SET, SerialIoError, latin1};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::MessageBus;

/// Messages held for [`BusClient::recv`] before the oldest are dropped.
pub const INBOX_CAPACITY: usize = 1024;

/// Callback invoked once per message received from the device.
pub type BytesHandler = Box<dyn FnMut(&[u8]) + Send + 'static>;

type SharedHandler = Arc<Mutex<Option<BytesHandler>>>;

/// Remote handle on one routed serial device.
pub struct BusClient {
    bus: Arc<dyn MessageBus>,
    device: String,
    channels: DeviceChannels,
    handler: SharedHandler,
    inbox: broadcast::Receiver<Vec<u8>>,
    listener: JoinHandle<()>,
}

impl BusClient {
    /// Bind to `device` without a receive handler.
    ///
    /// Received messages queue up for [`BusClient::recv`] until a handler is
    /// installed with [`BusClient::on_receive`].  At most [`INBOX_CAPACITY`]
    /// are kept; past that the oldest are dropped and the next `recv` logs
    /// how many were lost.
    ///
    /// # Errors
    ///
    /// [`SerialIoError::DeviceUnavailable`] when `device` is not in the
    /// registry set.  The check happens before any subscription is made and
    /// is not retried.
    pub async fn connect(bus: Arc<dyn MessageBus>, device: &str) -> Result<Self, SerialIoError> {
        Self::connect_inner(bus, device, None, INBOX_CAPACITY).await
    }

    /// Bind to `device` with `handler` installed before the first message can
    /// arrive.
    pub async fn connect_with_handler<H>(
        bus: Arc<dyn MessageBus>,
        device: &str,
        handler: H,
    ) -> Result<Self, SerialIoError>
    where
        H: FnMut(&[u8]) + Send + 'static,
    {
        Self::connect_inner(bus, device, Some(Box::new(handler)), INBOX_CAPACITY).await
    }

    async fn connect_inner(
        bus: Arc<dyn MessageBus>,
        device: &str,
        handler: Option<BytesHandler>,
        inbox_capacity: usize,
    ) -> Result<Self, SerialIoError> {
        if !bus.set_contains(REGISTRY_SET, device).await? {
            return Err(SerialIoError::DeviceUnavailable {
                device: device.to_string(),
            });
        }

        let channels = DeviceChannels::new(device);
        let mut subscription = bus.subscribe(&channels.read).await?;
        let handler: SharedHandler = Arc::new(Mutex::new(handler));
        let (inbox_tx, inbox) = broadcast::channel(inbox_capacity);

        let listener_handler = Arc::clone(&handler);
        let listener_device = device.to_string();
        let listener = tokio::spawn(async move {
            while let Some(bytes) = subscription.recv().await {
                let delivered = match listener_handler.lock() {
                    Ok(mut slot) => match slot.as_mut() {
                        Some(handler) => {
                            handler(&bytes);
                            true
                        }
                        None => false,
                    },
                    Err(_) => false,
                };
                // Only fails once the client, and with it the receiver, is gone.
                if !delivered && inbox_tx.send(bytes).is_err() {
                    break;
                }
            }
            debug!(device = %listener_device, "client read subscription ended");
        });

        Ok(Self {
            bus,
            device: device.to_string(),
            channels,
            handler,
            inbox,
            listener,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn channels(&self) -> &DeviceChannels {
        &self.channels
    }

    /// Install or replace the receive handler.
    pub fn on_receive<H>(&self, handler: H)
    where
        H: FnMut(&[u8]) + Send + 'static,
    {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = Some(Box::new(handler));
        }
    }

    /// Next message from the device while no handler is installed.
    ///
    /// Returns `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.inbox.recv().await {
                Ok(bytes) => return Some(bytes),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(device = %self.device, dropped = n, "client inbox full; oldest messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Publish raw bytes to the device's write channel.
    pub async fn send(&self, bytes: &[u8]) -> Result<usize, SerialIoError> {
        Ok(self.bus.publish(&self.channels.write, bytes).await?)
    }

    /// Publish text, one byte per character (see [`latin1`]).
    pub async fn send_text(&self, text: &str) -> Result<usize, SerialIoError> {
        self.send(&latin1::encode(text)).await
    }

    /// Publish a command string to the device's command channel.
    pub async fn send_command(&self, command: &str) -> Result<usize, SerialIoError> {
        Ok(self
            .bus
            .publish(&self.channels.command, command.as_bytes())
            .await?)
    }

    /// Stop listening.  Equivalent to dropping the client.
    pub fn close(self) {}
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
