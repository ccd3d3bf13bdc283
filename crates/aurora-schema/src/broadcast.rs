//! Status contract between the OS callback relay and the installer backends.

use serde::{Deserialize, Serialize};

use crate::session::InstallStatus;

/// Private action name under which normalized statuses are re-broadcast.
pub const ACTION_INSTALLATION_STATUS_CHANGED: &str =
    "com.aurora.store.action.INSTALLATION_STATUS_CHANGED";

/// Fallback text shown when no specific cause is known.
pub const GENERIC_FAILURE: &str = "Installation Failed";

/// Status codes reported by the OS package installer for a committed session.
///
/// The numeric values are platform-defined and only ever appear on the
/// boundary between the platform binding and the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsStatus {
    /// The user must confirm; the intent carries a confirmation activity.
    PendingUserAction,
    /// Installed.
    Success,
    /// Unspecified failure.
    Failure,
    /// Blocked by another package (device policy, verifier).
    FailureBlocked,
    /// Aborted by the user or by the installer itself.
    FailureAborted,
    /// The APKs are invalid or corrupted.
    FailureInvalid,
    /// Conflicts with an already installed package.
    FailureConflict,
    /// Not enough storage.
    FailureStorage,
    /// Incompatible with this device.
    FailureIncompatible,
}

impl OsStatus {
    /// Map a raw platform code, treating anything unknown as [`OsStatus::Failure`].
    pub const fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::PendingUserAction,
            0 => Self::Success,
            2 => Self::FailureBlocked,
            3 => Self::FailureAborted,
            4 => Self::FailureInvalid,
            5 => Self::FailureConflict,
            6 => Self::FailureStorage,
            7 => Self::FailureIncompatible,
            _ => Self::Failure,
        }
    }

    /// The raw platform code.
    pub const fn code(self) -> i32 {
        match self {
            Self::PendingUserAction => -1,
            Self::Success => 0,
            Self::Failure => 1,
            Self::FailureBlocked => 2,
            Self::FailureAborted => 3,
            Self::FailureInvalid => 4,
            Self::FailureConflict => 5,
            Self::FailureStorage => 6,
            Self::FailureIncompatible => 7,
        }
    }

    /// Human-readable description for failure codes.
    ///
    /// Returns `None` for [`OsStatus::Success`] and
    /// [`OsStatus::PendingUserAction`], which are not failures.
    pub const fn failure_description(self) -> Option<&'static str> {
        match self {
            Self::PendingUserAction | Self::Success => None,
            Self::FailureAborted => Some("Installation was aborted"),
            Self::FailureBlocked => Some("Installation was blocked by another package"),
            Self::FailureConflict => Some("Package conflicts with an existing package"),
            Self::FailureIncompatible => Some("Package is incompatible with this device"),
            Self::FailureInvalid => Some("Package is invalid or corrupted"),
            Self::FailureStorage => Some("Insufficient storage to install the package"),
            Self::Failure => Some(GENERIC_FAILURE),
        }
    }
}

/// Normalized status re-broadcast under [`ACTION_INSTALLATION_STATUS_CHANGED`].
///
/// `session_id` is the OS (or shell) session number, not the queue
/// [`SessionId`](crate::SessionId).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerBroadcast {
    /// Always terminal: [`InstallStatus::Succeeded`] or [`InstallStatus::Failed`].
    pub status: InstallStatus,
    /// OS session the status belongs to.
    pub session_id: i32,
    /// Package reported by the OS, if any.
    pub package_name: Option<String>,
    /// Failure description, if any.
    pub error_description: Option<String>,
}

impl InstallerBroadcast {
    /// A success broadcast.
    pub fn success(session_id: i32, package_name: Option<String>) -> Self {
        Self {
            status: InstallStatus::Succeeded,
            session_id,
            package_name,
            error_description: None,
        }
    }

    /// A failure broadcast.
    pub fn failure(
        session_id: i32,
        package_name: Option<String>,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            status: InstallStatus::Failed,
            session_id,
            package_name,
            error_description: Some(error_description.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_codes_fall_back_to_failure() {
        assert_eq!(OsStatus::from_code(42), OsStatus::Failure);
        assert_eq!(OsStatus::from_code(-7), OsStatus::Failure);
        assert_eq!(OsStatus::from_code(-1), OsStatus::PendingUserAction);
    }

    #[test]
    fn test_every_failure_has_a_description() {
        for code in 1..=7 {
            let status = OsStatus::from_code(code);
            assert_eq!(status.code(), code);
            assert!(status.failure_description().is_some(), "code {code}");
        }
        assert_eq!(OsStatus::Success.failure_description(), None);
        assert_eq!(OsStatus::Failure.failure_description(), Some(GENERIC_FAILURE));
    }

    #[test]
    fn test_failure_broadcast_carries_description() {
        let b = InstallerBroadcast::failure(7, None, "boom");
        assert_eq!(b.status, InstallStatus::Failed);
        assert_eq!(b.error_description.as_deref(), Some("boom"));
    }
}
