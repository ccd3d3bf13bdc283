//! Split-APK installation: queue, backends and status relay.

mod entry;
mod facade;
mod listener;
mod queue;
pub mod relay;
mod rooted;
mod standard;

use std::path::PathBuf;

use aurora_schema::{SessionId, StatusEvent};

use crate::error::InstallError;

pub use entry::QueueEntry;
pub use facade::{Installer, Notifier, Platform, TracingNotifier};
pub use listener::{ListenerId, Retain, StatusListener};
pub use queue::InstallerCore;
pub use relay::{BroadcastBus, StatusRelay};
pub use rooted::RootedBackend;
pub use standard::{
    PackageInstaller, SessionCanceller, SessionMode, SessionParams, SessionWriter, StandardBackend,
};

/// Terminal result of one backend transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Succeeded { package_name: Option<String> },
    Failed { reason: String },
}

impl SessionOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub(crate) fn into_event(self, session_id: SessionId) -> StatusEvent {
        match self {
            Self::Succeeded { package_name } => StatusEvent::succeeded(session_id, package_name),
            Self::Failed { reason } => StatusEvent::failed(session_id, reason),
        }
    }
}

/// Moves resolved APK files into the OS package manager.
///
/// Called on the install worker only, one session at a time. Errors are
/// turned into [`SessionOutcome::Failed`] by the caller.
pub trait InstallBackend: Send {
    fn install_files(
        &mut self,
        session: SessionId,
        files: &[PathBuf],
    ) -> Result<SessionOutcome, InstallError>;
}
