//! HID connection lifecycle for the deck
//!
//! Owns the physical handle and serializes every write through one mutex.
//! Three background threads run for the life of the manager: a read loop
//! polling non-blocking reads, a keepalive ticker, and a reconnect
//! supervisor. hidapi is a blocking C API, so these are OS threads; events
//! cross into async land over a tokio mpsc channel and connection state is
//! published through a watch channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;

use super::error::DeviceError;
use super::protocol::{
    self, CommandPacket, RawEventRecord, ACK_SIZE, PRODUCT_ID, VENDOR_ID, VENDOR_USAGE,
    VENDOR_USAGE_PAGE,
};
use super::transfer::{ImageUpload, PacketWriter};

/// Poll interval of the read loop when connected but idle
const READ_IDLE: Duration = Duration::from_micros(500);

/// Poll interval of the read loop while disconnected
const READ_PARKED: Duration = Duration::from_millis(50);

/// How often the keepalive and supervisor threads check their clocks
const TICK: Duration = Duration::from_millis(200);

/// Connection lifecycle state, observable through [`DeviceManager::subscribe_state`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connection lost; the supervisor retries while auto-reconnect is on
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Identity of a discovered device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
}

/// Manages the connection to the deck's vendor HID interface
pub struct DeviceManager {
    api: Arc<Mutex<HidApi>>,
    device: Arc<Mutex<Option<HidDevice>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    config: DeviceConfig,
    stop: Arc<AtomicBool>,
}

impl DeviceManager {
    /// Create the manager and start its background threads. Does not
    /// connect; call [`connect`](Self::connect) for the initial attempt.
    ///
    /// Decoded event records are forwarded in arrival order on `record_tx`.
    pub fn new(
        config: DeviceConfig,
        record_tx: mpsc::UnboundedSender<RawEventRecord>,
    ) -> Result<Self, DeviceError> {
        let api = Arc::new(Mutex::new(HidApi::new()?));
        let device = Arc::new(Mutex::new(None));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let state_tx = Arc::new(state_tx);
        let stop = Arc::new(AtomicBool::new(false));

        let manager = Self {
            api,
            device,
            state_tx,
            config,
            stop,
        };
        manager.start_read_loop(record_tx);
        manager.start_keepalive();
        manager.start_supervisor();
        Ok(manager)
    }

    /// Look for the deck without opening it
    pub fn find_device() -> Result<DeviceInfo, DeviceError> {
        let api = HidApi::new()?;
        let info = api
            .device_list()
            .find(is_vendor_interface)
            .ok_or(DeviceError::DeviceNotFound)?;
        Ok(DeviceInfo {
            manufacturer: info.manufacturer_string().unwrap_or("Unknown").to_string(),
            product: info.product_string().unwrap_or("Unknown").to_string(),
            serial_number: info.serial_number().unwrap_or("").to_string(),
        })
    }

    /// Discover, open and wake the device, then run the init sequence.
    ///
    /// On failure the state moves to `Error` when auto-reconnect is on (so
    /// the supervisor keeps retrying) or back to `Disconnected` otherwise.
    pub fn connect(&self) -> Result<(), DeviceError> {
        if *self.state_tx.borrow() == ConnectionState::Connected {
            return Ok(());
        }
        self.state_tx.send_replace(ConnectionState::Connecting);

        match open_and_wake(&self.api) {
            Ok(dev) => {
                *self.device.lock() = Some(dev);
                self.state_tx.send_replace(ConnectionState::Connected);
                info!("Connected to device");
                Ok(())
            }
            Err(e) => {
                let next = if self.config.auto_reconnect {
                    ConnectionState::Error
                } else {
                    ConnectionState::Disconnected
                };
                self.state_tx.send_replace(next);
                Err(e)
            }
        }
    }

    /// Release the handle. Idempotent; sends the shutdown sequence
    /// best-effort so the device leaves software mode cleanly.
    pub fn disconnect(&self) {
        let taken = self.device.lock().take();
        if let Some(dev) = taken {
            for packet in protocol::shutdown_sequence() {
                if let Err(e) = write_packet_to(&dev, &packet) {
                    debug!("Shutdown write failed (ignored): {}", e);
                    break;
                }
            }
            info!("Disconnected from device");
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch every connection state transition
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Write one packet over the vendor interrupt endpoint.
    ///
    /// All writers funnel through the device mutex, so commands from
    /// different callers never interleave mid-packet. An I/O failure here
    /// is treated as connection loss, not surfaced as a caller bug.
    pub fn write(&self, packet: &CommandPacket) -> Result<usize, DeviceError> {
        let mut guard = self.device.lock();
        let dev = guard.as_ref().ok_or(DeviceError::NotConnected)?;
        match write_packet_to(dev, packet) {
            Ok(n) => Ok(n),
            Err(e) => {
                *guard = None;
                drop(guard);
                warn!("Write failed, marking connection lost: {}", e);
                self.state_tx.send_replace(ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// Set panel brightness, percent 0-100
    pub fn set_brightness(&self, percent: u8) -> Result<(), DeviceError> {
        self.write(&protocol::brightness(percent)?)?;
        debug!("Brightness set to {}%", percent);
        Ok(())
    }

    /// Send the keepalive command
    pub fn keep_alive(&self) -> Result<(), DeviceError> {
        self.write(&protocol::keep_alive())?;
        Ok(())
    }

    /// Blank all LCD button faces
    pub fn clear_display(&self) -> Result<(), DeviceError> {
        self.write(&protocol::clear_display())?;
        Ok(())
    }

    /// Reset the device-side pressed-button bookkeeping
    pub fn clear_button_state(&self) -> Result<(), DeviceError> {
        self.write(&protocol::clear_button_state())?;
        Ok(())
    }

    /// Upload a pre-encoded image to LCD button `key`
    pub fn upload_image(&self, key: u8, data: &[u8]) -> Result<(), DeviceError> {
        let mut job = ImageUpload::new(key, data)?;
        self.run_upload(&mut job)
    }

    /// Drive a staged [`ImageUpload`] job. Use this form to keep a cancel
    /// handle. The device mutex is held for the whole BAT..STP sequence -
    /// one upload at a time, and no keepalive or brightness packet can
    /// slip between chunks.
    pub fn run_upload(&self, job: &mut ImageUpload) -> Result<(), DeviceError> {
        let mut guard = self.device.lock();
        let dev = guard.as_ref().ok_or(DeviceError::NotConnected)?;
        let result = job.run(&mut DeviceWriter { dev });
        if matches!(result, Err(DeviceError::Hid(_))) {
            *guard = None;
            drop(guard);
            warn!("Upload write failed, marking connection lost");
            self.state_tx.send_replace(ConnectionState::Error);
        }
        result
    }

    /// Read loop: polls non-blocking reads at sub-millisecond interval and
    /// forwards decoded records. Malformed frames are dropped silently.
    fn start_read_loop(&self, record_tx: mpsc::UnboundedSender<RawEventRecord>) {
        let device = Arc::clone(&self.device);
        let state_tx = Arc::clone(&self.state_tx);
        let stop = Arc::clone(&self.stop);

        thread::Builder::new()
            .name("deck-read".into())
            .spawn(move || {
                let mut buf = [0u8; ACK_SIZE];
                while !stop.load(Ordering::Relaxed) {
                    enum Read {
                        Parked,
                        Empty,
                        Frame(usize),
                        Failed(String),
                    }
                    let outcome = {
                        let guard = device.lock();
                        match guard.as_ref() {
                            None => Read::Parked,
                            Some(dev) => match dev.read_timeout(&mut buf, 0) {
                                Ok(0) => Read::Empty,
                                Ok(n) => Read::Frame(n),
                                Err(e) => Read::Failed(e.to_string()),
                            },
                        }
                    };
                    match outcome {
                        Read::Parked => thread::sleep(READ_PARKED),
                        Read::Empty => thread::sleep(READ_IDLE),
                        Read::Frame(n) => match protocol::decode_event(&buf[..n]) {
                            Some(record) => {
                                if record_tx.send(record).is_err() {
                                    debug!("Event consumer gone, read loop exiting");
                                    return;
                                }
                            }
                            None => debug!("Dropping unrecognized {}-byte frame", n),
                        },
                        Read::Failed(e) => {
                            warn!("Read failed, marking connection lost: {}", e);
                            mark_connection_error(&device, &state_tx);
                            thread::sleep(READ_PARKED);
                        }
                    }
                }
                debug!("Read loop stopped");
            })
            .ok();
    }

    /// Keepalive ticker: the device drops back to standalone firmware mode
    /// when it hears nothing for a while.
    fn start_keepalive(&self) {
        let device = Arc::clone(&self.device);
        let state_tx = Arc::clone(&self.state_tx);
        let stop = Arc::clone(&self.stop);
        let interval = Duration::from_secs(self.config.keepalive_secs);

        thread::Builder::new()
            .name("deck-keepalive".into())
            .spawn(move || {
                let mut last = Instant::now();
                while !stop.load(Ordering::Relaxed) {
                    if *state_tx.borrow() == ConnectionState::Connected
                        && last.elapsed() >= interval
                    {
                        last = Instant::now();
                        let failed = {
                            let guard = device.lock();
                            match guard.as_ref() {
                                Some(dev) => {
                                    write_packet_to(dev, &protocol::keep_alive()).is_err()
                                }
                                None => false,
                            }
                        };
                        if failed {
                            warn!("Keepalive write failed, marking connection lost");
                            mark_connection_error(&device, &state_tx);
                        } else {
                            debug!("Keepalive sent");
                        }
                    }
                    thread::sleep(TICK);
                }
                debug!("Keepalive stopped");
            })
            .ok();
    }

    /// Reconnect supervisor. A single loop owns retry scheduling, so there
    /// is never more than one outstanding attempt no matter how often the
    /// connection fails.
    fn start_supervisor(&self) {
        let api = Arc::clone(&self.api);
        let device = Arc::clone(&self.device);
        let state_tx = Arc::clone(&self.state_tx);
        let stop = Arc::clone(&self.stop);
        let auto = self.config.auto_reconnect;
        let retry = Duration::from_secs(self.config.reconnect_secs);

        thread::Builder::new()
            .name("deck-reconnect".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    if auto && *state_tx.borrow() == ConnectionState::Error {
                        state_tx.send_replace(ConnectionState::Connecting);
                        match open_and_wake(&api) {
                            Ok(dev) => {
                                *device.lock() = Some(dev);
                                state_tx.send_replace(ConnectionState::Connected);
                                info!("Reconnected to device");
                            }
                            Err(e) => {
                                debug!("Reconnect attempt failed: {}", e);
                                state_tx.send_replace(ConnectionState::Error);
                                sleep_responsive(retry, &stop);
                            }
                        }
                    } else {
                        thread::sleep(TICK);
                    }
                }
                debug!("Reconnect supervisor stopped");
            })
            .ok();
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.disconnect();
    }
}

impl PacketWriter for DeviceManager {
    fn write_packet(&mut self, packet: &CommandPacket) -> Result<usize, DeviceError> {
        self.write(packet)
    }
}

/// Writer over a handle whose lock the caller already holds
struct DeviceWriter<'a> {
    dev: &'a HidDevice,
}

impl PacketWriter for DeviceWriter<'_> {
    fn write_packet(&mut self, packet: &CommandPacket) -> Result<usize, DeviceError> {
        write_packet_to(self.dev, packet)
    }
}

fn is_vendor_interface(info: &&hidapi::DeviceInfo) -> bool {
    info.vendor_id() == VENDOR_ID
        && info.product_id() == PRODUCT_ID
        && info.usage_page() == VENDOR_USAGE_PAGE
        && info.usage() == VENDOR_USAGE
}

/// Find the vendor interface, open it, wake the device and run the init
/// sequence. The device emits no event frames at all until the feature
/// report wake transfer has succeeded.
fn open_and_wake(api: &Mutex<HidApi>) -> Result<HidDevice, DeviceError> {
    let api = api.lock();

    let dev = {
        let info = api
            .device_list()
            .find(is_vendor_interface)
            .ok_or(DeviceError::DeviceNotFound)?;
        debug!(
            "Found vendor interface: {} {}",
            info.manufacturer_string().unwrap_or("Unknown"),
            info.product_string().unwrap_or("Unknown")
        );
        info.open_device(&api)?
    };
    dev.set_blocking_mode(false)?;

    // Wake transfer; the response carries an informational version string
    let mut report = [0u8; ACK_SIZE];
    report[0] = 0;
    let n = dev
        .get_feature_report(&mut report)
        .map_err(|e| DeviceError::Handshake(e.to_string()))?;
    let version: String = report[1..n]
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect();
    if !version.is_empty() {
        info!("Device firmware: {}", version);
    }

    write_packet_to(&dev, &protocol::display_init())
        .map_err(|e| DeviceError::Handshake(e.to_string()))?;
    write_packet_to(&dev, &protocol::quick_setup())
        .map_err(|e| DeviceError::Handshake(e.to_string()))?;

    Ok(dev)
}

/// Single blocking interrupt write, report ID prefixed
fn write_packet_to(dev: &HidDevice, packet: &CommandPacket) -> Result<usize, DeviceError> {
    let bytes = packet.as_bytes();
    let mut data = Vec::with_capacity(bytes.len() + 1);
    data.push(0x00); // report ID
    data.extend_from_slice(bytes);
    let written = dev.write(&data)?;
    Ok(written)
}

/// Sleep up to `total`, waking early when the stop flag is set
fn sleep_responsive(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline && !stop.load(Ordering::Relaxed) {
        thread::sleep(TICK.min(deadline.saturating_duration_since(Instant::now())));
    }
}

/// Drop the handle and publish `Error` so the supervisor takes over
fn mark_connection_error(
    device: &Mutex<Option<HidDevice>>,
    state_tx: &watch::Sender<ConnectionState>,
) {
    *device.lock() = None;
    state_tx.send_replace(ConnectionState::Error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Error.to_string(), "error");
    }

    #[test]
    fn mark_connection_error_transitions_and_is_idempotent() {
        let device: Mutex<Option<HidDevice>> = Mutex::new(None);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);

        mark_connection_error(&device, &state_tx);
        assert_eq!(*state_rx.borrow(), ConnectionState::Error);

        // A second failure before the retry fires changes nothing
        mark_connection_error(&device, &state_tx);
        assert_eq!(*state_rx.borrow(), ConnectionState::Error);
        assert!(device.lock().is_none());
    }
}
