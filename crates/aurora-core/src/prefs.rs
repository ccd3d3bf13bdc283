//! Stored user choices consulted on every install.

use aurora_schema::InstallMethod;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Preferences {
    pub install_method: InstallMethod,
    /// Delete the staged APKs once the package is installed.
    pub delete_after_install: bool,
}

/// Source of the current [`Preferences`].
///
/// Queried once per install, so implementations should return the latest
/// value rather than a snapshot taken at construction.
pub trait PreferenceStore: Send + Sync {
    fn preferences(&self) -> Preferences;
}

impl<T: PreferenceStore + ?Sized> PreferenceStore for Arc<T> {
    fn preferences(&self) -> Preferences {
        (**self).preferences()
    }
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    inner: Mutex<Preferences>,
}

impl MemoryPreferences {
    pub fn new(prefs: Preferences) -> Self {
        Self {
            inner: Mutex::new(prefs),
        }
    }

    pub fn set(&self, prefs: Preferences) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = prefs;
    }
}

impl PreferenceStore for MemoryPreferences {
    fn preferences(&self) -> Preferences {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Preferences backed by a TOML file, re-read on every query.
#[derive(Debug, Clone)]
pub struct FilePreferences {
    path: PathBuf,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Preferences, ConfigError> {
        if !self.path.exists() {
            return Ok(Preferences::default());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Atomically persist `prefs`.
    ///
    /// The content goes to a temporary file in the same directory, is synced,
    /// then renamed over the target so readers never see a partial file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, writing or the rename fails.
    pub fn save(&self, prefs: &Preferences) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(prefs)?;
        let write_err = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        temp.write_all(content.as_bytes()).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

impl Default for FilePreferences {
    /// `<home>/preferences.toml`
    fn default() -> Self {
        Self::new(crate::paths::preferences_path())
    }
}

impl PreferenceStore for FilePreferences {
    fn preferences(&self) -> Preferences {
        self.load().unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "Unreadable preferences, using defaults");
            Preferences::default()
        })
    }
}
