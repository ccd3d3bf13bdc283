//! Queue-level identifiers and the status stream delivered to listeners.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifiers handed out by an installer core start strictly above this value.
pub const SESSION_ID_BASE: u64 = 1_000_000;

/// Correlation key for one queued installation.
///
/// This is the installer's own number space. It is unrelated to the session
/// numbers handed out by the OS package installer or by `pm install-create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a queued installation.
///
/// Transitions are `Queued -> Installing -> {Succeeded | Failed}`. Terminal
/// states are final; there is no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    /// Moved into the backlog, waiting for the worker.
    Queued,
    /// Popped from the backlog and handed to the backend.
    Installing,
    /// The package manager accepted the package.
    Succeeded,
    /// Any failure, including cancellation.
    Failed,
}

impl InstallStatus {
    /// Whether no further transition can follow.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Integer code carried in the `status` extra of an
    /// [`InstallerBroadcast`](crate::InstallerBroadcast).
    pub const fn code(self) -> i32 {
        match self {
            Self::Queued => 0,
            Self::Installing => 1,
            Self::Succeeded => 2,
            Self::Failed => 3,
        }
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "QUEUED",
            Self::Installing => "INSTALLING",
            Self::Succeeded => "INSTALLATION_SUCCEED",
            Self::Failed => "INSTALLATION_FAILED",
        };
        f.write_str(name)
    }
}

/// One status transition, as delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// The queue entry this transition belongs to.
    pub session_id: SessionId,
    /// The new state.
    pub status: InstallStatus,
    /// Installed package, when known (only on success).
    pub package_name: Option<String>,
    /// Human-readable cause (only on failure).
    pub error: Option<String>,
}

impl StatusEvent {
    /// A non-terminal transition with no payload.
    pub fn progress(session_id: SessionId, status: InstallStatus) -> Self {
        Self {
            session_id,
            status,
            package_name: None,
            error: None,
        }
    }

    /// Terminal success.
    pub fn succeeded(session_id: SessionId, package_name: Option<String>) -> Self {
        Self {
            session_id,
            status: InstallStatus::Succeeded,
            package_name,
            error: None,
        }
    }

    /// Terminal failure with a description.
    pub fn failed(session_id: SessionId, error: impl Into<String>) -> Self {
        Self {
            session_id,
            status: InstallStatus::Failed,
            package_name: None,
            error: Some(error.into()),
        }
    }
}
