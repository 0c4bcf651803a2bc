//! [`Router`] – bridges one serial device to its bus channels.
//!
//! Every event source pushes a [`RouterEvent`] into a per-router queue:
//!
//! - a blocking reader thread produces [`RouterEvent::DeviceBytes`], one
//!   event per chunk the driver reports;
//! - one forwarder task per subscription produces [`RouterEvent::Write`] and
//!   [`RouterEvent::Command`], and [`RouterEvent::SubscriptionLost`] if its
//!   stream ends underneath it.
//!
//! A single dispatcher task consumes the queue and is the only owner of the
//! write side of the device.  Device→bus and bus→device traffic therefore
//! never block each other, and writes reach the device in the order the
//! `write` subscription delivered them.
//!
//! # Lifecycle
//!
//! `Opening → Online → ShuttingDown → Closed`.  Failures while opening are
//! returned from [`Router::open`]; once online, errors are logged and
//! absorbed.  Two things leave `Online`: the `"shutdown"` command, and the
//! end of either subscription.  A router that lost a subscription can no
//! longer be written to or stopped over the bus, so it closes the device
//! and reports the loss through [`Router::failure`].  Nothing leaves
//! `Closed`.
//!
//! The router never touches the registry set; see
//! [`Launcher`][crate::launcher::Launcher].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serialio_hal::{LinkOpener, SerialLink, device_path};
use serialio_middleware::{ConfigSource, MessageBus, MilestoneLog, Subscription, load_link_settings};
use serialio_types::{BusError, Command, DeviceChannels, HalError, LinkSettings, SerialIoError, latin1};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

// ────────────────────────────────────────────────────────────────────────────
// Context and state
// ────────────────────────────────────────────────────────────────────────────

/// Collaborators a router is built from.
#[derive(Clone)]
pub struct RouterContext {
    pub bus: Arc<dyn MessageBus>,
    pub config: Arc<dyn ConfigSource>,
    pub opener: Arc<dyn LinkOpener>,
    /// Directory device nodes live under, usually `/dev`.
    pub device_root: String,
}

/// Router lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Opening,
    Online,
    ShuttingDown,
    Closed,
}

/// One unit of work for the dispatcher.
#[derive(Debug)]
pub enum RouterEvent {
    /// A chunk read from the device.
    DeviceBytes(Vec<u8>),
    /// Payload from the `write` channel.
    Write(Vec<u8>),
    /// Text from the `command` channel.
    Command(String),
    /// The subscription to the named channel ended.
    SubscriptionLost(String),
}

struct RouterShared {
    device: String,
    alive: AtomicBool,
    failure: OnceLock<BusError>,
    state: watch::Sender<RouterState>,
}

impl RouterShared {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn set_state(&self, state: RouterState) {
        self.state.send_replace(state);
    }
}

/// Aborts the wrapped task when dropped.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Router
// ────────────────────────────────────────────────────────────────────────────

/// A running bridge for one device.
///
/// Dropping a router stops it without running the shutdown sequence.
pub struct Router {
    path: String,
    settings: LinkSettings,
    shared: Arc<RouterShared>,
    _dispatcher: TaskGuard,
}

impl Router {
    /// Fetch settings, open the device, subscribe, and go online.
    ///
    /// # Errors
    ///
    /// - [`SerialIoError::Config`] when the configuration source is
    ///   unreachable.
    /// - [`SerialIoError::Device`] when the device cannot be opened.
    /// - [`SerialIoError::Bus`] when either subscription fails.
    pub async fn open(ctx: RouterContext, device: &str) -> Result<Router, SerialIoError> {
        let (state, _) = watch::channel(RouterState::Opening);
        let shared = Arc::new(RouterShared {
            device: device.to_string(),
            alive: AtomicBool::new(false),
            failure: OnceLock::new(),
            state,
        });
        let log = MilestoneLog::new(format!("SerialPort_{device}")).with_bus(Arc::clone(&ctx.bus));

        let settings = load_link_settings(ctx.config.as_ref(), device).await?;
        let path = device_path(&ctx.device_root, device);

        let opener = Arc::clone(&ctx.opener);
        let open_path = path.clone();
        let mut link = tokio::task::spawn_blocking(move || opener.open(&open_path, &settings))
            .await
            .map_err(|e| SerialIoError::Join(e.to_string()))??;

        log.record(format!(
            "Serial port device opened, baud rate: {}, data bits: {}, parity: {}, stop bits: {}",
            settings.baud_rate, settings.data_bits, settings.parity, settings.stop_bits
        ))
        .await;

        let reader = match link.try_clone_link() {
            Ok(reader) => reader,
            Err(e) => {
                link.close();
                return Err(e.into());
            }
        };
        let channels = DeviceChannels::new(device);
        let subscriptions = async {
            let write_sub = ctx.bus.subscribe(&channels.write).await?;
            let command_sub = ctx.bus.subscribe(&channels.command).await?;
            Ok::<_, BusError>((write_sub, command_sub))
        }
        .await;
        let (write_sub, command_sub) = match subscriptions {
            Ok(subs) => subs,
            Err(e) => {
                link.close();
                return Err(e.into());
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let forwarders = vec![
            TaskGuard(tokio::spawn(forward(write_sub, events_tx.clone(), RouterEvent::Write))),
            TaskGuard(tokio::spawn(forward(command_sub, events_tx.clone(), |bytes| {
                RouterEvent::Command(latin1::decode(&bytes))
            }))),
        ];

        shared.alive.store(true, Ordering::Release);
        let reader_shared = Arc::clone(&shared);
        tokio::task::spawn_blocking(move || read_loop(reader, reader_shared, events_tx));

        let dispatcher = Dispatcher {
            shared: Arc::clone(&shared),
            bus: Arc::clone(&ctx.bus),
            channels,
            link: Some(link),
            forwarders,
            log: log.clone(),
        };
        let dispatcher = TaskGuard(tokio::spawn(dispatcher.run(events_rx)));

        shared.set_state(RouterState::Online);
        log.record(format!(
            "Serial port device {device} online, {} connected.",
            ctx.bus.describe()
        ))
        .await;

        Ok(Router {
            path,
            settings,
            shared,
            _dispatcher: dispatcher,
        })
    }

    pub fn device(&self) -> &str {
        &self.shared.device
    }

    /// Full device path, e.g. `/dev/ttyUSB0`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// `true` until the router has received `"shutdown"` or lost a
    /// subscription.
    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Why the router went offline on its own, if it did.
    ///
    /// `None` while online and after an orderly `"shutdown"`.
    pub fn failure(&self) -> Option<BusError> {
        self.shared.failure.get().cloned()
    }

    pub fn state(&self) -> RouterState {
        *self.shared.state.borrow()
    }

    /// Resolve once the router has reached [`RouterState::Closed`].
    pub async fn wait_closed(&self) {
        let mut state = self.shared.state.subscribe();
        // The sender lives in `self.shared`, so this only ends on `Closed`.
        let _ = state.wait_for(|s| *s == RouterState::Closed).await;
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Event producers
// ────────────────────────────────────────────────────────────────────────────

async fn forward<F>(
    mut subscription: Subscription,
    events: mpsc::UnboundedSender<RouterEvent>,
    wrap: F,
) where
    F: Fn(Vec<u8>) -> RouterEvent,
{
    while let Some(payload) = subscription.recv().await {
        if events.send(wrap(payload)).is_err() {
            debug!(channel = subscription.channel(), "subscription forwarder finished");
            return;
        }
    }
    warn!(channel = subscription.channel(), "subscription ended");
    let _ = events.send(RouterEvent::SubscriptionLost(subscription.channel().to_string()));
}

fn read_loop(
    mut link: Box<dyn SerialLink>,
    shared: Arc<RouterShared>,
    events: mpsc::UnboundedSender<RouterEvent>,
) {
    while shared.is_alive() {
        match link.read_chunk() {
            Ok(Some(bytes)) => {
                if events.send(RouterEvent::DeviceBytes(bytes)).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(HalError::Closed { .. }) => break,
            Err(e) => {
                warn!(device = %shared.device, error = %e, "serial read failed; reader stopped");
                break;
            }
        }
    }
    link.close();
    debug!(device = %shared.device, "reader finished");
}

// ────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ────────────────────────────────────────────────────────────────────────────

struct Dispatcher {
    shared: Arc<RouterShared>,
    bus: Arc<dyn MessageBus>,
    channels: DeviceChannels,
    link: Option<Box<dyn SerialLink>>,
    forwarders: Vec<TaskGuard>,
    log: MilestoneLog,
}

impl Dispatcher {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<RouterEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                RouterEvent::DeviceBytes(bytes) => self.publish_read(bytes).await,
                RouterEvent::Write(bytes) => self.write_device(bytes).await,
                RouterEvent::Command(text) => match Command::parse(&text) {
                    Command::Shutdown => {
                        self.shutdown().await;
                        return;
                    }
                    Command::Unknown(other) => {
                        debug!(device = %self.shared.device, command = %other, "ignoring command")
                    }
                },
                RouterEvent::SubscriptionLost(channel) => {
                    self.lose_subscription(channel).await;
                    return;
                }
            }
        }
    }

    /// Read chunks are dropped, not queued, while the bus is down.
    async fn publish_read(&mut self, bytes: Vec<u8>) {
        if !self.bus.is_connected().await {
            trace!(device = %self.shared.device, len = bytes.len(), "bus down; read chunk dropped");
            return;
        }
        if let Err(e) = self.bus.publish(&self.channels.read, &bytes).await {
            debug!(device = %self.shared.device, error = %e, "read chunk not published");
        }
    }

    /// Writes are skipped while the device is not open.
    async fn write_device(&mut self, bytes: Vec<u8>) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        if !link.is_open() {
            self.link = Some(link);
            return;
        }
        let outcome = tokio::task::spawn_blocking(move || {
            let result = link.write_all(&bytes);
            (link, result)
        })
        .await;
        match outcome {
            Ok((link, result)) => {
                if let Err(e) = result {
                    warn!(device = %self.shared.device, error = %e, "serial write failed");
                }
                self.link = Some(link);
            }
            Err(e) => warn!(device = %self.shared.device, error = %e, "serial writer lost"),
        }
    }

    async fn shutdown(&mut self) {
        self.log.record("Shutdown command received.").await;
        self.close().await;
    }

    async fn lose_subscription(&mut self, channel: String) {
        self.log
            .record(format!("Subscription to {channel} lost, taking device offline."))
            .await;
        // Must be visible before `alive` clears.
        let _ = self.shared.failure.set(BusError::SubscriptionLost(channel));
        self.close().await;
    }

    async fn close(&mut self) {
        self.shared.set_state(RouterState::ShuttingDown);
        self.shared.alive.store(false, Ordering::Release);
        self.forwarders.clear();

        if let Some(mut link) = self.link.take() {
            let closed = tokio::task::spawn_blocking(move || link.close()).await;
            if let Err(e) = closed {
                warn!(device = %self.shared.device, error = %e, "serial close failed");
            }
        }

        self.shared.set_state(RouterState::Closed);
        self.log
            .record(format!("Serial port device {} closed.", self.shared.device))
            .await;
    }
}
