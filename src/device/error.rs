use thiserror::Error;

/// Errors surfaced by the device communication layer
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no compatible device found")]
    DeviceNotFound,

    #[error("wake handshake failed: {0}")]
    Handshake(String),

    #[error("device not connected")]
    NotConnected,

    #[error("command encoding failed: {0}")]
    Encoding(String),

    #[error("value {value} out of range {min}..={max}")]
    Range { value: u32, min: u32, max: u32 },

    #[error("image payload of {size} bytes exceeds device buffer ({max} bytes)")]
    ImageTooLarge { size: usize, max: usize },

    #[error("upload cancelled")]
    UploadCancelled,

    #[error("HID error: {0}")]
    Hid(String),
}

impl From<hidapi::HidError> for DeviceError {
    fn from(e: hidapi::HidError) -> Self {
        DeviceError::Hid(e.to_string())
    }
}
