//! EXIF reading and in-process writing.
//!
//! - [`read_tags`] reads every tag of any supported image as `(key, raw value)` pairs
//! - [`LibraryBackend`] writes edits back through `little_exif`
//!
//! Tag keys and storage formats come from the [`tags`] catalogue.

mod reader;
pub mod tags;
mod writer;

pub use reader::{ImageInfo, probe_image, read_tags};
pub use writer::LibraryBackend;
