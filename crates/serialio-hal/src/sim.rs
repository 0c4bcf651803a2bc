//! In-process simulated serial devices for testing without hardware.
//!
//! A [`SimOpener`] knows a fixed set of device paths.  Each registered path
//! hands the test a [`SimDevice`] handle that plays the far end of the wire:
//! [`SimDevice::inject`] delivers one read event to the link, and
//! [`SimDevice::written`] shows every byte the link has written.
//!
//! # Example
//!
//! ```rust
//! use serialio_hal::{LinkOpener, SerialLink, SimOpener};
//! use serialio_types::LinkSettings;
//!
//! let opener = SimOpener::new();
//! let device = opener.add_device("/dev/ttyUSB0");
//!
//! let mut link = opener.open("/dev/ttyUSB0", &LinkSettings::default()).unwrap();
//! link.write_all(b"AT\r\n").unwrap();
//! device.inject(b"OK\r\n");
//!
//! assert_eq!(device.written(), b"AT\r\n");
//! assert_eq!(link.read_chunk().unwrap(), Some(b"OK\r\n".to_vec()));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use serialio_types::{HalError, LinkSettings};

use crate::link::{LinkOpener, SerialLink};

const DEFAULT_SIM_POLL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct SimState {
    open: bool,
    open_count: usize,
    settings: Option<LinkSettings>,
    inbound: VecDeque<Vec<u8>>,
    written: Vec<u8>,
}

#[derive(Default)]
struct SimShared {
    state: Mutex<SimState>,
    readable: Condvar,
}

/// Test-side handle on one simulated device.
#[derive(Clone)]
pub struct SimDevice {
    path: String,
    shared: Arc<SimShared>,
}

impl SimDevice {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            shared: Arc::new(SimShared::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not hide the device from the others.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Deliver `bytes` to the link as a single read event.
    pub fn inject(&self, bytes: &[u8]) {
        self.state().inbound.push_back(bytes.to_vec());
        self.shared.readable.notify_all();
    }

    /// Every byte written to the device so far, in write order.
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// How many times the device has been opened.
    pub fn open_count(&self) -> usize {
        self.state().open_count
    }

    /// Settings used by the most recent open.
    pub fn settings(&self) -> Option<LinkSettings> {
        self.state().settings
    }
}

/// [`LinkOpener`] over registered [`SimDevice`]s.
pub struct SimOpener {
    devices: Mutex<HashMap<String, SimDevice>>,
    poll_interval: Duration,
}

impl SimOpener {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            poll_interval: DEFAULT_SIM_POLL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Register `path` and return its test handle.
    ///
    /// Registering an existing path returns the existing handle.
    pub fn add_device(&self, path: &str) -> SimDevice {
        let mut devices = self
            .devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        devices
            .entry(path.to_string())
            .or_insert_with(|| SimDevice::new(path))
            .clone()
    }

    pub fn device(&self, path: &str) -> Option<SimDevice> {
        self.devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(path)
            .cloned()
    }
}

impl Default for SimOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkOpener for SimOpener {
    fn open(&self, path: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>, HalError> {
        let device = self.device(path).ok_or_else(|| HalError::Unavailable {
            path: path.to_string(),
            details: "No such file or directory".to_string(),
        })?;
        let generation = {
            let mut state = device.state();
            state.open = true;
            state.open_count += 1;
            state.settings = Some(*settings);
            state.open_count
        };
        Ok(Box::new(SimLink {
            device,
            generation,
            poll_interval: self.poll_interval,
        }))
    }
}

/// Link side of a [`SimDevice`].
///
/// Clones share the device; closing any handle closes the device for all of
/// them, like closing the underlying descriptor.  Handles from an earlier
/// open see the device as closed once it is reopened.
pub struct SimLink {
    device: SimDevice,
    generation: usize,
    poll_interval: Duration,
}

impl SimLink {
    fn live(&self, state: &SimState) -> bool {
        state.open && state.open_count == self.generation
    }

    fn closed(&self) -> HalError {
        HalError::Closed {
            path: self.device.path.clone(),
        }
    }
}

impl SerialLink for SimLink {
    fn path(&self) -> &str {
        &self.device.path
    }

    fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, HalError> {
        let mut state = self.device.state();
        if !self.live(&state) {
            return Err(self.closed());
        }
        if state.inbound.is_empty() {
            state = self
                .device
                .shared
                .readable
                .wait_timeout(state, self.poll_interval)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
            if !self.live(&state) {
                return Err(self.closed());
            }
        }
        Ok(state.inbound.pop_front())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        let mut state = self.device.state();
        if !self.live(&state) {
            return Err(self.closed());
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    fn try_clone_link(&self) -> Result<Box<dyn SerialLink>, HalError> {
        if !self.is_open() {
            return Err(self.closed());
        }
        Ok(Box::new(SimLink {
            device: self.device.clone(),
            generation: self.generation,
            poll_interval: self.poll_interval,
        }))
    }

    fn close(&mut self) {
        {
            let mut state = self.device.state();
            if state.open_count == self.generation {
                state.open = false;
            }
        }
        self.device.shared.readable.notify_all();
    }

    fn is_open(&self) -> bool {
        self.live(&self.device.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn open(opener: &SimOpener, path: &str) -> Box<dyn SerialLink> {
        opener.open(path, &LinkSettings::default()).unwrap()
    }

    #[test]
    fn unknown_path_is_unavailable() {
        let opener = SimOpener::new();
        let result = opener.open("/dev/ttyUSB9", &LinkSettings::default());
        assert!(matches!(result, Err(HalError::Unavailable { .. })));
    }

    #[test]
    fn open_records_settings_and_count() {
        let opener = SimOpener::new();
        let device = opener.add_device("/dev/ttyS0");
        let mut settings = LinkSettings::default();
        settings.set_baud_rate("9600");

        let _link = opener.open("/dev/ttyS0", &settings).unwrap();
        assert!(device.is_open());
        assert_eq!(device.open_count(), 1);
        assert_eq!(device.settings().unwrap().baud_rate, 9600);
    }

    #[test]
    fn injected_events_stay_separate() {
        let opener = SimOpener::new();
        let device = opener.add_device("/dev/ttyS0");
        let mut link = open(&opener, "/dev/ttyS0");

        device.inject(b"ab");
        device.inject(b"c");
        assert_eq!(link.read_chunk().unwrap(), Some(b"ab".to_vec()));
        assert_eq!(link.read_chunk().unwrap(), Some(b"c".to_vec()));
        assert_eq!(link.read_chunk().unwrap(), None);
    }

    #[test]
    fn read_wakes_on_inject_from_another_thread() {
        let opener = SimOpener::new().with_poll_interval(Duration::from_secs(5));
        let device = opener.add_device("/dev/ttyS0");
        let mut link = open(&opener, "/dev/ttyS0");

        let injector = device.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            injector.inject(&[0x7f]);
        });

        let started = Instant::now();
        assert_eq!(link.read_chunk().unwrap(), Some(vec![0x7f]));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn writes_accumulate_in_order() {
        let opener = SimOpener::new();
        let device = opener.add_device("/dev/ttyS0");
        let mut link = open(&opener, "/dev/ttyS0");

        link.write_all(b"A").unwrap();
        link.write_all(b"B").unwrap();
        link.write_all(&[0x00, 0xff]).unwrap();
        assert_eq!(device.written(), vec![b'A', b'B', 0x00, 0xff]);
    }

    #[test]
    fn close_is_seen_by_clones() {
        let opener = SimOpener::new();
        let device = opener.add_device("/dev/ttyS0");
        let mut link = open(&opener, "/dev/ttyS0");
        let mut reader = link.try_clone_link().unwrap();

        link.close();
        link.close();
        assert!(!device.is_open());
        assert!(matches!(reader.read_chunk(), Err(HalError::Closed { .. })));
        assert!(matches!(link.write_all(b"x"), Err(HalError::Closed { .. })));
        assert!(link.try_clone_link().is_err());
    }

    #[test]
    fn stale_handle_cannot_close_a_reopened_device() {
        let opener = SimOpener::new();
        let device = opener.add_device("/dev/ttyS0");
        let mut old = open(&opener, "/dev/ttyS0");
        old.close();

        let mut current = open(&opener, "/dev/ttyS0");
        old.close();
        assert!(device.is_open());
        assert!(!old.is_open());
        assert!(matches!(old.write_all(b"x"), Err(HalError::Closed { .. })));

        current.write_all(b"y").unwrap();
        assert_eq!(device.written(), b"y");
    }
}
