use std::path::{Path, PathBuf};

use aurora_schema::SessionId;

use crate::io::extract::{self, ExtractError, ExtractedApks};

#[derive(Debug)]
enum Payload {
    Files(Vec<PathBuf>),
    Archive {
        archive: PathBuf,
        cache_root: PathBuf,
        extracted: Option<ExtractedApks>,
    },
}

/// One unit of installable work: a list of APKs, or a zip of them that is
/// extracted on first access.
#[derive(Debug)]
pub struct QueueEntry {
    session_id: SessionId,
    payload: Payload,
}

impl QueueEntry {
    pub fn from_files(files: Vec<PathBuf>, session_id: SessionId) -> Self {
        Self {
            session_id,
            payload: Payload::Files(files),
        }
    }

    /// Extraction will create its directory under `cache_root`.
    pub fn from_archive(archive: PathBuf, cache_root: PathBuf, session_id: SessionId) -> Self {
        Self {
            session_id,
            payload: Payload::Archive {
                archive,
                cache_root,
                extracted: None,
            },
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The APKs of this entry, extracting the archive on the first call.
    pub fn files(&mut self) -> Result<&[PathBuf], ExtractError> {
        match &mut self.payload {
            Payload::Files(files) => Ok(files.as_slice()),
            Payload::Archive {
                archive,
                cache_root,
                extracted,
            } => {
                if extracted.is_none() {
                    *extracted = Some(extract::extract_apks(archive, cache_root)?);
                }
                Ok(extracted
                    .as_ref()
                    .map(|e| e.files.as_slice())
                    .unwrap_or_default())
            }
        }
    }

    /// Extraction directory, if extraction has happened.
    pub fn cache_dir(&self) -> Option<&Path> {
        match &self.payload {
            Payload::Archive {
                extracted: Some(e), ..
            } => Some(&e.dir),
            _ => None,
        }
    }

    /// Delete the extraction directory. No-op if nothing was extracted.
    pub fn clear(&mut self) {
        let Payload::Archive { extracted, .. } = &mut self.payload else {
            return;
        };
        let Some(done) = extracted.take() else {
            return;
        };
        match std::fs::remove_dir_all(&done.dir) {
            Ok(()) => tracing::debug!(session = %self.session_id, dir = %done.dir.display(), "Cleared cache"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(session = %self.session_id, dir = %done.dir.display(), error = %e, "Failed to clear cache");
            }
        }
    }
}
