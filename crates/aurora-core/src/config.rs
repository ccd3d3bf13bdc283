//! Installer configuration loaded from `installer.toml`.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration rooted under [`paths::aurora_home`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::paths;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallerConfig {
    /// Root under which archive extractions get their own subdirectory.
    pub cache_dir: PathBuf,
    /// Directory the downloader writes APKs into.
    pub download_dir: PathBuf,
    /// Root of OBB placement; each package gets `<obb_dir>/<package>/`.
    pub obb_dir: PathBuf,
    /// Superuser command, optionally with arguments.
    pub root_command: String,
    /// Installer package passed to `pm install-create -i`.
    pub installer_package: String,
    /// Upper bound on waiting for the OS result after commit, and on each
    /// root shell command. `None` waits forever.
    pub commit_timeout_secs: Option<u64>,
    /// Android user id for shell commands.
    pub user: u32,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            cache_dir: paths::cache_dir(),
            download_dir: paths::download_dir(),
            obb_dir: paths::obb_dir(),
            root_command: "su".to_string(),
            installer_package: "com.aurora.store".to_string(),
            commit_timeout_secs: None,
            user: 0,
        }
    }
}

impl InstallerConfig {
    /// Load a config file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No installer config, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn commit_timeout(&self) -> Option<Duration> {
        self.commit_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = InstallerConfig::from_toml_str(
            r#"
            root_command = "/system/xbin/su"
            commit_timeout_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.root_command, "/system/xbin/su");
        assert_eq!(config.commit_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.installer_package, "com.aurora.store");
        assert_eq!(config.user, 0);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = InstallerConfig::load(&dir.path().join("installer.toml")).unwrap();
        assert_eq!(config, InstallerConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("installer.toml");
        std::fs::write(&path, "user = \"zero\"").unwrap();
        assert!(matches!(
            InstallerConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
