//! Data model: sources, frame keys and decoded frames.

pub mod frame;
pub mod source;

pub use frame::{FILE_STAMP_FORMAT, FILE_STAMP_LEN, Frame, FrameImage, FrameKey, clamp};
pub use source::{Source, SourceCatalog};
