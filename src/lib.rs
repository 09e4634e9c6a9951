//! # exif-edit
//!
//! Read, display and edit EXIF metadata in photo files, writing edits back
//! either in-process or through a persistent external worker (`exiftool`) for
//! formats the in-process library cannot write.
//!
//! ## Quick Start
//!
//! Everything goes through the [`pipeline::Transcoder`] facade:
//!
//! ```rust,no_run
//! use exif_edit::config::Config;
//! use exif_edit::pipeline::Transcoder;
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let transcoder = Transcoder::from_config(&config);
//!
//!     let path = Path::new("IMG_0001.heic");
//!     let mut image = transcoder.load(path)?;
//!
//!     for field in image.fields() {
//!         for (name, value) in &field.values {
//!             println!("{name}: {value}");
//!         }
//!     }
//!
//!     // Edit the title the way its field encodes it
//!     let title = image.fields().into_iter().find(|f| f.label == "Title");
//!     if let Some((key, raw)) = title.and_then(|f| f.encode_edit("Sunset over the bay")) {
//!         image.snapshot.apply_edit(key, raw);
//!     }
//!
//!     transcoder.commit(path, image.snapshot.pending_edits())?;
//!     image.snapshot.drain_edits();
//!
//!     transcoder.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Read | Write |
//! |--------|------|-------|
//! | JPEG (`.jpg`, `.jpeg`) | nom-exif | little_exif, spliced with img-parts |
//! | PNG, WebP | little_exif | little_exif |
//! | HEIC/HEIF (`.heic`, `.heif`) | nom-exif | external worker |
//! | TIFF and others | nom-exif | not writable |
//!
//! WebP writes need an extended (VP8X) container; a simple lossy or lossless
//! WebP fails with an `Open` error, as does any other format little_exif does
//! not know.
//!
//! ## Modules
//!
//! - [`codec`] — Raw value conversions (rationals, GPS, byte text, base64, sizes)
//! - [`config`] — Configuration types and loading/saving
//! - [`error`] — Error types
//! - [`exif`] — Tag catalogue, reader and in-process writer
//! - [`format`] — Which backend writes which file
//! - [`pipeline`] — The load/commit facade
//! - [`present`] — Display fields built from a snapshot
//! - [`snapshot`] — Tags read from a file plus pending edits
//! - [`worker`] — The persistent external worker

pub mod codec;
pub mod config;
pub mod error;
pub mod exif;
pub mod format;
pub mod pipeline;
pub mod present;
pub mod snapshot;
pub mod worker;
