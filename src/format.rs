use std::path::Path;

/// Which persistence backend writes a given file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Written in-process through the metadata library.
    LibraryBacked,
    /// Written by the persistent external worker.
    WorkerBacked,
}

/// Extensions (lowercase) that need the external worker. Everything else is
/// library-backed.
const WORKER_EXTENSIONS: &[&str] = &["heic", "heif"];

/// Decide the backend from the file extension alone (case-insensitive).
///
/// # Example
///
/// ```rust
/// use exif_edit::format::{classify, Backend};
/// use std::path::Path;
///
/// assert_eq!(classify(Path::new("IMG_0001.HEIC")), Backend::WorkerBacked);
/// assert_eq!(classify(Path::new("photo.jpg")), Backend::LibraryBacked);
/// ```
pub fn classify(path: &Path) -> Backend {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if WORKER_EXTENSIONS.contains(&ext.as_str()) {
        Backend::WorkerBacked
    } else {
        Backend::LibraryBacked
    }
}
