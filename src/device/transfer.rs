//! Chunked image upload to LCD button faces
//!
//! Three-phase handshake: a BAT packet announcing total size and target
//! key, the payload in 1024-byte data packets (final chunk zero-padded),
//! then STP to commit. Chunks carry no sequence numbers - ordering is
//! implicit in transmission order, so the whole sequence must go out over
//! the write path without interleaving from other commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::error::DeviceError;
use super::events::LCD_BUTTON_COUNT;
use super::protocol::{self, CommandPacket, PACKET_SIZE};

/// Device-side image buffer limit. The BAT size field is a u16.
pub const MAX_IMAGE_BYTES: usize = u16::MAX as usize;

/// Sink for outbound packets. Implemented by the connection manager;
/// tests substitute a recording mock.
pub trait PacketWriter {
    fn write_packet(&mut self, packet: &CommandPacket) -> Result<usize, DeviceError>;
}

/// Cancellation handle for an in-flight upload.
///
/// Best effort: the protocol has no abort command, so cancelling simply
/// stops sending remaining chunks. The device is left with a partial
/// buffer until the next successful upload - documented behavior.
#[derive(Debug, Clone)]
pub struct UploadCancel(Arc<AtomicBool>);

impl UploadCancel {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// One image upload job: target key, encoded payload, chunk cursor
#[derive(Debug)]
pub struct ImageUpload {
    key: u8,
    data: Vec<u8>,
    cursor: usize,
    cancelled: Arc<AtomicBool>,
}

impl ImageUpload {
    /// Validate and stage an upload of pre-encoded image bytes for LCD
    /// button `key`. The payload is opaque here; encoding and sizing are
    /// the image collaborator's concern.
    pub fn new(key: u8, data: &[u8]) -> Result<Self, DeviceError> {
        if key >= LCD_BUTTON_COUNT {
            return Err(DeviceError::Range {
                value: key as u32,
                min: 0,
                max: (LCD_BUTTON_COUNT - 1) as u32,
            });
        }
        if data.is_empty() || data.len() > MAX_IMAGE_BYTES {
            return Err(DeviceError::ImageTooLarge {
                size: data.len(),
                max: MAX_IMAGE_BYTES,
            });
        }
        Ok(Self {
            key,
            data: data.to_vec(),
            cursor: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle for cancelling this job from another task
    pub fn cancel_handle(&self) -> UploadCancel {
        UploadCancel(Arc::clone(&self.cancelled))
    }

    /// Drive the full BAT / data / STP sequence through `writer`.
    ///
    /// The caller is responsible for holding the connection's write lock
    /// for the duration - two interleaved uploads corrupt both images.
    pub fn run<W: PacketWriter>(&mut self, writer: &mut W) -> Result<(), DeviceError> {
        let total = self.data.len();
        debug!(
            "Uploading {} bytes to LCD button {} ({} chunks)",
            total,
            self.key,
            total.div_ceil(PACKET_SIZE)
        );

        writer.write_packet(&protocol::batch_start(total as u16, self.key))?;

        while self.cursor < total {
            if self.cancelled.load(Ordering::Relaxed) {
                warn!(
                    "Upload to button {} cancelled at byte {} of {}",
                    self.key, self.cursor, total
                );
                return Err(DeviceError::UploadCancelled);
            }
            let end = (self.cursor + PACKET_SIZE).min(total);
            let chunk = CommandPacket::from_payload(&self.data[self.cursor..end])?;
            writer.write_packet(&chunk)?;
            self.cursor = end;
        }

        writer.write_packet(&protocol::stop_image())?;
        debug!("Upload to button {} committed", self.key);
        Ok(())
    }
}
