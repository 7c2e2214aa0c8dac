//! Candidate enumeration and random selection over a media directory.
//!
//! The directory is re-read on every dispatch so files can be added or
//! removed while the bot runs.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use rand::Rng;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use autosticker_shared::error::MediaError;

/// A file that may be sent. `format_tag` is derived from the extension only
/// and is a hint; the transform probes the actual content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub format_tag: Option<ImageFormat>,
    pub byte_length: u64,
}

#[derive(Debug, Clone)]
pub struct MediaCatalog {
    directory: PathBuf,
}

impl MediaCatalog {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// List regular files in the catalog directory, sorted by path.
    pub async fn list_candidates(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<MediaAsset>, MediaError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MediaError::Cancelled),
            result = scan_directory(&self.directory) => result,
        }
    }

    /// Uniform pick over `candidates`.
    pub fn pick<R: Rng + ?Sized>(
        &self,
        mut candidates: Vec<MediaAsset>,
        rng: &mut R,
    ) -> Result<MediaAsset, MediaError> {
        if candidates.is_empty() {
            return Err(MediaError::EmptyCatalog(self.directory.display().to_string()));
        }

        let index = rng.gen_range(0..candidates.len());
        let asset = candidates.swap_remove(index);
        debug!(path = %asset.path.display(), index, "Picked media asset");
        Ok(asset)
    }
}

async fn scan_directory(directory: &Path) -> Result<Vec<MediaAsset>, MediaError> {
    let mut assets = Vec::new();
    let mut entries = fs::read_dir(directory).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        // follows symlinks; dangling links are skipped
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        assets.push(MediaAsset {
            format_tag: ImageFormat::from_path(&path).ok(),
            byte_length: metadata.len(),
            path,
        });
    }

    // read_dir order is platform dependent
    assets.sort_by(|a, b| a.path.cmp(&b.path));

    debug!(
        directory = %directory.display(),
        count = assets.len(),
        "Scanned media directory"
    );

    Ok(assets)
}
