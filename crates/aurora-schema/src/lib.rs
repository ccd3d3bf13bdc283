//! Shared types for the Aurora split-APK installer.
//!
//! This crate holds the vocabulary exchanged between the installer core, its
//! backends, the status relay and the embedding application. It has no I/O.

pub mod broadcast;
pub mod delivery;
pub mod session;
pub mod types;

// Re-exports
pub use broadcast::*;
pub use delivery::*;
pub use session::*;
pub use types::*;
