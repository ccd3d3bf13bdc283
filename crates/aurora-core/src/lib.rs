//! Split-APK installer core for Aurora Store.
//!
//! The entry point is [`Installer`], built once by the embedding application
//! and shared with whatever component needs to install packages. Underneath
//! it sit two [`InstallerCore`] queues, one per backend, each serializing its
//! sessions on a private worker thread.

pub mod apk;
pub mod config;
pub mod delivery;
pub mod error;
pub mod installer;
pub mod io;
pub mod paths;
pub mod prefs;
pub mod root;

pub use config::InstallerConfig;
pub use error::InstallError;
pub use installer::{
    Installer, InstallerCore, Notifier, Platform, Retain, StatusListener, TracingNotifier,
};
pub use prefs::{FilePreferences, MemoryPreferences, PreferenceStore, Preferences};
