mod error;
mod manager;
mod transfer;

pub mod events;
pub mod protocol;

pub use error::DeviceError;
pub use events::{CodeClass, ElementAddress, Rotation, MODIFIER_ELEMENT};
pub use manager::{ConnectionState, DeviceInfo, DeviceManager};
pub use protocol::{CommandPacket, RawEventRecord};
pub use transfer::{ImageUpload, PacketWriter, UploadCancel, MAX_IMAGE_BYTES};
