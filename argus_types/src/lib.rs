pub mod chat;
pub mod detection;
pub mod frame;

pub use chat::{ChatMessage, Role};
pub use detection::{BoundingBox, DetectionRecord, LineError};
pub use frame::{FrameMeta, ObjectMeta, Rect};
