//! Split-APK archive extraction
//!
//! An archive is accepted only if every entry is a flat `.apk` file. The whole
//! archive is validated before anything touches the disk, so a rejected
//! archive never leaves a cache directory behind.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("No valid APKs found: entry `{name}` {reason}")]
    InvalidEntry { name: String, reason: &'static str },

    #[error("No valid APKs found: archive is empty")]
    Empty,
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Files produced by [`extract_apks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedApks {
    /// Freshly created cache subdirectory owning every extracted file
    pub dir: PathBuf,
    /// Extracted APKs in archive order
    pub files: Vec<PathBuf>,
}

/// Extract a split-APK zip into a new subdirectory of `dest_root`.
///
/// The subdirectory name starts with the current timestamp in milliseconds
/// followed by a random suffix, so concurrent extractions never collide.
pub fn extract_apks(archive_path: &Path, dest_root: &Path) -> Result<ExtractedApks, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;

    let names = validate_entries(&mut archive)?;

    fs::create_dir_all(dest_root)?;
    let prefix = format!("{}-", chrono::Utc::now().timestamp_millis());
    // Removed on drop until `keep`, which covers a failure halfway through.
    let dir = tempfile::Builder::new()
        .prefix(&prefix)
        .tempdir_in(dest_root)?;

    let mut files = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let mut entry = archive.by_index(i)?;
        let path = dir.path().join(name);
        let mut out = File::create(&path)?;
        io::copy(&mut entry, &mut out)?;
        files.push(path);
    }

    let dir = dir.keep();

    tracing::debug!(archive = %archive_path.display(), dir = %dir.display(), "Extracted split APKs");
    Ok(ExtractedApks { dir, files })
}

fn validate_entries(archive: &mut ZipArchive<File>) -> Result<Vec<String>, ExtractError> {
    if archive.is_empty() {
        return Err(ExtractError::Empty);
    }

    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        let name = entry.name().to_string();
        let invalid = |reason| ExtractError::InvalidEntry {
            name: name.clone(),
            reason,
        };

        if entry.is_dir() {
            return Err(invalid("is a directory"));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(invalid("is not at the archive root"));
        }
        if entry.enclosed_name().is_none() {
            return Err(invalid("has an unsafe path"));
        }
        if !name.to_ascii_lowercase().ends_with(".apk") {
            return Err(invalid("is not an APK"));
        }
        names.push(name);
    }
    Ok(names)
}
