//! Wire protocol for the AJAZZ/Mirabox vendor interface
//!
//! Reverse-engineered from USB captures. Outbound commands are fixed
//! 1024-byte "CRT" packets, inbound acknowledgements are fixed 512-byte
//! "ACK" frames:
//!
//! ```text
//! CRT packet:  43 52 54 00 00 <name, NUL-terminated> .. <params @ 13> .. 00
//! ACK frame:   41 43 4B 00 00 4F 4B 00 00 <event> <state> 00 ..
//! ```
//!
//! Command names are short ASCII literals; the name region is 8 bytes so
//! the longest name ("CONNECT") still leaves room for its terminator.

use std::time::Instant;

use super::error::DeviceError;

/// USB Vendor ID for AJAZZ/Mirabox (HOTSPOTEKUSB)
pub const VENDOR_ID: u16 = 0x0300;

/// USB Product ID for the AKP03-class deck (6 LCD keys, 3 buttons, 3 knobs)
pub const PRODUCT_ID: u16 = 0x1001;

/// Usage page of the vendor protocol interface. Discovery goes by this
/// value, never by product strings - those vary across OS drivers.
pub const VENDOR_USAGE_PAGE: u16 = 0xFFA0;

/// Usage ID on the vendor usage page
pub const VENDOR_USAGE: u16 = 0x01;

/// Outbound command packet size
pub const PACKET_SIZE: usize = 1024;

/// Inbound acknowledgement frame size
pub const ACK_SIZE: usize = 512;

/// Command packet header
const CRT_HEADER: &[u8; 3] = b"CRT";

/// Acknowledgement frame header
const ACK_HEADER: &[u8; 3] = b"ACK";

/// Status marker inside a valid acknowledgement frame
const ACK_STATUS: &[u8; 2] = b"OK";

/// Offset of the command name within a CRT packet
const NAME_OFFSET: usize = 5;

/// Bytes reserved for the command name including its NUL terminator
const NAME_REGION: usize = 8;

/// Offset of command-specific parameter bytes
const PARAM_OFFSET: usize = NAME_OFFSET + NAME_REGION;

/// Offsets of the event and state codes within an ACK frame
const EVENT_CODE_OFFSET: usize = 9;
const STATE_CODE_OFFSET: usize = 10;

// Command name table, as captured. Names are literals, not computed.
pub const CMD_CONNECT: &str = "CONNECT"; // wake / keepalive
pub const CMD_DISPLAY_INIT: &str = "DIS";
pub const CMD_QUICK_SETUP: &str = "KEY"; // enables per-key event reporting
pub const CMD_BRIGHTNESS: &str = "LIG";
pub const CMD_CLEAR_DISPLAY: &str = "CLE";
pub const CMD_CLEAR_BUTTON: &str = "CEL";
pub const CMD_HALT: &str = "HAN";
pub const CMD_BATCH_START: &str = "BAT";
pub const CMD_STOP_IMAGE: &str = "STP";

/// A fixed 1024-byte outbound frame
#[derive(Clone)]
pub struct CommandPacket {
    data: Box<[u8; PACKET_SIZE]>,
}

impl CommandPacket {
    fn zeroed() -> Self {
        Self {
            data: Box::new([0u8; PACKET_SIZE]),
        }
    }

    /// Raw packet bytes, always exactly [`PACKET_SIZE`] long
    pub fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.data
    }

    /// Command name carried by this packet, if it is a CRT packet
    pub fn command_name(&self) -> Option<&str> {
        if &self.data[..3] != CRT_HEADER {
            return None;
        }
        let region = &self.data[NAME_OFFSET..NAME_OFFSET + NAME_REGION];
        let len = region.iter().position(|&b| b == 0).unwrap_or(NAME_REGION);
        std::str::from_utf8(&region[..len]).ok()
    }

    /// Parameter bytes region of a CRT packet
    pub fn params(&self) -> &[u8] {
        &self.data[PARAM_OFFSET..]
    }

    /// Build a raw data packet (used for image payload chunks, which carry
    /// no CRT framing). `payload` longer than the packet is rejected.
    pub fn from_payload(payload: &[u8]) -> Result<Self, DeviceError> {
        if payload.len() > PACKET_SIZE {
            return Err(DeviceError::Encoding(format!(
                "payload of {} bytes exceeds packet size",
                payload.len()
            )));
        }
        let mut packet = Self::zeroed();
        packet.data[..payload.len()].copy_from_slice(payload);
        Ok(packet)
    }
}

impl std::fmt::Debug for CommandPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.command_name() {
            Some(name) => write!(f, "CommandPacket({name})"),
            None => write!(f, "CommandPacket(raw)"),
        }
    }
}

/// A decoded acknowledgement frame: event code, state code, arrival time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEventRecord {
    pub code: u8,
    pub state: u8,
    pub at: Instant,
}

/// Frame a command packet. Assumes a name from the command table; callers
/// outside this module go through [`encode_command`] which validates.
fn write_frame(name: &str, params: &[u8]) -> CommandPacket {
    let mut packet = CommandPacket::zeroed();
    packet.data[..3].copy_from_slice(CRT_HEADER);
    packet.data[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(name.as_bytes());
    packet.data[PARAM_OFFSET..PARAM_OFFSET + params.len()].copy_from_slice(params);
    packet
}

/// Encode an arbitrary command into a CRT packet.
///
/// The name must be ASCII and fit the name region with its NUL terminator;
/// parameters must fit the remainder of the packet.
pub fn encode_command(name: &str, params: &[u8]) -> Result<CommandPacket, DeviceError> {
    if name.is_empty() || !name.is_ascii() {
        return Err(DeviceError::Encoding(format!(
            "command name {name:?} is not plain ASCII"
        )));
    }
    if name.len() >= NAME_REGION {
        return Err(DeviceError::Encoding(format!(
            "command name {name:?} exceeds the {NAME_REGION}-byte name region"
        )));
    }
    if params.len() > PACKET_SIZE - PARAM_OFFSET {
        return Err(DeviceError::Encoding(format!(
            "{} parameter bytes exceed packet capacity",
            params.len()
        )));
    }
    Ok(write_frame(name, params))
}

/// Decode an inbound acknowledgement frame.
///
/// Returns `None` when the header or status marker does not match - partial
/// and malformed frames are expected USB noise and must be dropped, never
/// treated as errors.
pub fn decode_event(buffer: &[u8]) -> Option<RawEventRecord> {
    if buffer.len() <= STATE_CODE_OFFSET {
        return None;
    }
    if &buffer[..3] != ACK_HEADER {
        return None;
    }
    if &buffer[5..7] != ACK_STATUS {
        return None;
    }
    Some(RawEventRecord {
        code: buffer[EVENT_CODE_OFFSET],
        state: buffer[STATE_CODE_OFFSET],
        at: Instant::now(),
    })
}

/// Brightness command, percent 0-100 as a single parameter byte
pub fn brightness(percent: u8) -> Result<CommandPacket, DeviceError> {
    if percent > 100 {
        return Err(DeviceError::Range {
            value: percent as u32,
            min: 0,
            max: 100,
        });
    }
    Ok(write_frame(CMD_BRIGHTNESS, &[percent]))
}

/// Keepalive, also doubles as the logical connect command
pub fn keep_alive() -> CommandPacket {
    write_frame(CMD_CONNECT, &[])
}

/// Display initialization, first packet of the init sequence
pub fn display_init() -> CommandPacket {
    write_frame(CMD_DISPLAY_INIT, &[])
}

/// Quick command setup, second packet of the init sequence. Without it the
/// device stays in its standalone firmware mode and reports no events.
pub fn quick_setup() -> CommandPacket {
    write_frame(CMD_QUICK_SETUP, &[])
}

/// Clear all LCD button faces
pub fn clear_display() -> CommandPacket {
    write_frame(CMD_CLEAR_DISPLAY, &[])
}

/// Clear the device-side pressed-button state
pub fn clear_button_state() -> CommandPacket {
    write_frame(CMD_CLEAR_BUTTON, &[])
}

/// Shutdown sequence: clear the display, then halt. Order matters - the
/// device ignores CLE once halted.
pub fn shutdown_sequence() -> [CommandPacket; 2] {
    [clear_display(), write_frame(CMD_HALT, &[])]
}

/// Batch-image-start: announces `total_size` payload bytes for LCD button
/// `key` (0-based here, 1-based on the wire).
pub fn batch_start(total_size: u16, key: u8) -> CommandPacket {
    let size = total_size.to_be_bytes();
    write_frame(CMD_BATCH_START, &[size[0], size[1], key + 1])
}

/// Stop-image: commits the buffered image after the final data chunk
pub fn stop_image() -> CommandPacket {
    write_frame(CMD_STOP_IMAGE, &[])
}
