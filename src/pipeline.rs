use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{CommitError, LoadError};
use crate::exif::{self, ImageInfo, LibraryBackend};
use crate::format::{self, Backend};
use crate::present::{self, Field};
use crate::snapshot::{Snapshot, TagMap};
use crate::worker::WorkerBackend;

/// One image as read from disk.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub path: PathBuf,
    pub snapshot: Snapshot,
    pub info: ImageInfo,
    /// Backend a commit to this file will go through.
    pub backend: Backend,
}

impl LoadedImage {
    /// Display fields for this image.
    pub fn fields(&self) -> Vec<Field> {
        present::present(&self.snapshot, &self.info, &self.path, self.backend)
    }
}

/// Single entry point for reading and writing image metadata.
///
/// Reads always go through the in-process library. Writes are routed by
/// [`format::classify`] to either the library or the external worker.
///
/// # Example
///
/// ```rust,no_run
/// use exif_edit::config::Config;
/// use exif_edit::pipeline::Transcoder;
/// use std::path::Path;
///
/// # fn example() -> anyhow::Result<()> {
/// let transcoder = Transcoder::from_config(&Config::default());
/// let path = Path::new("photo.jpg");
///
/// let mut image = transcoder.load(path)?;
/// image.snapshot.apply_edit("Exif.Image.Artist", "Jane Doe");
///
/// transcoder.commit(path, image.snapshot.pending_edits())?;
/// image.snapshot.drain_edits();
/// # Ok(())
/// # }
/// ```
pub struct Transcoder {
    library: LibraryBackend,
    worker: WorkerBackend,
    backup_originals: bool,
}

impl Transcoder {
    pub fn new(library: LibraryBackend, worker: WorkerBackend, backup_originals: bool) -> Self {
        Self {
            library,
            worker,
            backup_originals,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            LibraryBackend::new(),
            WorkerBackend::from_config(&config.worker),
            config.output.backup_originals,
        )
    }

    pub fn backend_for(&self, path: &Path) -> Backend {
        format::classify(path)
    }

    /// Read all tags of `path` plus its dimensions and size.
    pub fn load(&self, path: &Path) -> Result<LoadedImage, LoadError> {
        let pairs = exif::read_tags(path)?;
        let info = exif::probe_image(path)?;
        let snapshot = Snapshot::load(pairs);

        log::info!(
            "Loaded {} ({} tags, {})",
            path.display(),
            snapshot.len(),
            crate::codec::format_byte_size(info.file_size)
        );

        Ok(LoadedImage {
            path: path.to_path_buf(),
            snapshot,
            info,
            backend: self.backend_for(path),
        })
    }

    /// Persist `edits` to `path`.
    ///
    /// The caller owns its pending edits and should drop them only once this
    /// returns `Ok`; on error they are still valid for a retry.
    pub fn commit(&self, path: &Path, edits: &TagMap) -> Result<(), CommitError> {
        if edits.is_empty() {
            log::debug!("Nothing to commit for {}", path.display());
            return Ok(());
        }

        // Backup original if configured
        if self.backup_originals {
            if let Err(e) = backup_file(path) {
                log::warn!("Failed to backup {}: {e}", path.display());
            }
        }

        let backend = self.backend_for(path);
        log::info!(
            "Committing {} edit(s) to {} via {:?}",
            edits.len(),
            path.display(),
            backend
        );

        match backend {
            Backend::LibraryBacked => self.library.commit(path, edits)?,
            Backend::WorkerBacked => {
                self.worker
                    .commit(path, edits)
                    .map_err(|source| CommitError::Worker {
                        path: path.to_path_buf(),
                        source,
                    })?
            }
        }
        Ok(())
    }

    /// Stop the external worker, if one was started.
    pub fn shutdown(&self) {
        self.worker.shutdown();
    }
}

/// Copy `path` to `<path>.<ext>.bak` unless that backup already exists.
fn backup_file(path: &Path) -> std::io::Result<PathBuf> {
    let backup_path = path.with_extension(format!(
        "{}.bak",
        path.extension().unwrap_or_default().to_string_lossy()
    ));

    if !backup_path.exists() {
        std::fs::copy(path, &backup_path)?;
        log::debug!("Backup created: {}", backup_path.display());
    }

    Ok(backup_path)
}
