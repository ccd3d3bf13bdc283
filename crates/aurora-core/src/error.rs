//! Domain-specific errors for installation operations

use aurora_schema::SessionId;
use thiserror::Error;

use crate::apk::ApkError;
use crate::io::extract::ExtractError;

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Root access is unavailable")]
    RootUnavailable,

    #[error("Shell command failed: {0}")]
    Shell(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("Failed to read APK metadata: {0}")]
    Apk(#[from] ApkError),

    #[error("Timed out waiting for installer session {0}")]
    Timeout(i32),

    #[error("No APKs found for {package} ({version_code})")]
    NoApks { package: String, version_code: u64 },

    #[error("Session {0} cannot be cancelled")]
    NotCancellable(SessionId),

    #[error("Installer worker is gone")]
    WorkerGone,

    #[error("{context}: {message}")]
    Context {
        context: &'static str,
        message: String,
    },
}

impl InstallError {
    /// Create an error with context for better debugging.
    pub fn context(ctx: &'static str, msg: impl std::fmt::Display) -> Self {
        Self::Context {
            context: ctx,
            message: msg.to_string(),
        }
    }
}
