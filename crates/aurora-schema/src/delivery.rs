//! Download-delivery descriptor supplied by the upstream store client.
//!
//! The installer only consumes this to decide where downloaded files must
//! land; how the URLs were obtained is not its concern.

use serde::{Deserialize, Serialize};

/// Everything the store client hands over for one app version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryData {
    /// Package name (e.g., "org.example.app")
    pub package_name: String,

    /// Version code being delivered
    pub version_code: u64,

    /// URL of the base APK
    pub base_url: String,

    /// Configuration splits that must be installed with the base APK
    #[serde(default)]
    pub splits: Vec<SplitDelivery>,

    /// Expansion files placed next to the package, not installed
    #[serde(default)]
    pub obb: Vec<ObbDelivery>,
}

/// One configuration split.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitDelivery {
    /// Split name, e.g. "config.arm64_v8a"
    pub name: String,
    /// Download URL
    pub url: String,
}

/// Expansion file kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObbKind {
    /// Primary expansion file.
    Main,
    /// Patch applied on top of the main file.
    Patch,
}

impl ObbKind {
    /// File name prefix used on disk.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Patch => "patch",
        }
    }
}

/// One expansion file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObbDelivery {
    /// Main or patch
    pub kind: ObbKind,
    /// Version code the file was published with (may predate the APK)
    pub version_code: u64,
    /// Download URL
    pub url: String,
    /// Size in bytes, when advertised
    pub size: Option<u64>,
}

/// Errors that can occur when validating a [`DeliveryData`].
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DeliveryError {
    /// A required field is empty.
    #[error("Empty field: {0}")]
    EmptyField(&'static str),

    /// A URL does not use http(s).
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Two splits share a name and would overwrite each other on disk.
    #[error("Duplicate split: {0}")]
    DuplicateSplit(String),
}

impl DeliveryData {
    /// Checks the fields the installer relies on.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::EmptyField`] for an empty package name or base
    /// URL, [`DeliveryError::InvalidUrl`] for a non-http URL, and
    /// [`DeliveryError::DuplicateSplit`] when two splits share a name.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        if self.package_name.is_empty() {
            return Err(DeliveryError::EmptyField("package_name"));
        }
        if self.base_url.is_empty() {
            return Err(DeliveryError::EmptyField("base_url"));
        }
        let urls = std::iter::once(&self.base_url)
            .chain(self.splits.iter().map(|s| &s.url))
            .chain(self.obb.iter().map(|o| &o.url));
        for url in urls {
            if !url.starts_with("http") {
                return Err(DeliveryError::InvalidUrl(url.clone()));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for split in &self.splits {
            if !seen.insert(split.name.as_str()) {
                return Err(DeliveryError::DuplicateSplit(split.name.clone()));
            }
        }
        Ok(())
    }
}
