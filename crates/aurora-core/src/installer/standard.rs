//! Standard backend - OS package-installer sessions
//!
//! Each queue entry becomes one OS session in full-install mode: every APK
//! is streamed in under its own file name and synced, then the session is
//! committed with a [`PendingIntent`] pointing at the [`StatusRelay`]. The
//! result arrives out of band, so the install worker blocks on a bus
//! registration until the relay delivers it.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::time::Duration;

use aurora_schema::{GENERIC_FAILURE, InstallStatus, OsStatus, SessionId};

use super::relay::{OsStatusIntent, PendingIntent, StatusRelay};
use super::{InstallBackend, SessionOutcome};
use crate::error::InstallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Replace the whole package
    FullInstall,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub mode: SessionMode,
    pub installer_package: String,
}

impl SessionParams {
    pub fn full_install(installer_package: impl Into<String>) -> Self {
        Self {
            mode: SessionMode::FullInstall,
            installer_package: installer_package.into(),
        }
    }
}

/// Stream into one file of an open OS session.
pub trait SessionWriter: Write + Send {
    /// Flush the written bytes to storage.
    fn fsync(&mut self) -> io::Result<()>;
}

/// The platform package-installer transaction API.
pub trait PackageInstaller: Send + Sync {
    fn create_session(&self, params: &SessionParams) -> io::Result<i32>;

    fn open_write(&self, session: i32, name: &str, size: u64) -> io::Result<Box<dyn SessionWriter>>;

    /// Commit the session; the result is reported later through `callback`.
    fn commit(&self, session: i32, callback: PendingIntent) -> io::Result<()>;

    fn abandon(&self, session: i32) -> io::Result<()>;
}

pub struct StandardBackend {
    installer: Arc<dyn PackageInstaller>,
    relay: StatusRelay,
    installer_package: String,
    commit_timeout: Option<Duration>,
    current: Arc<Mutex<Option<i32>>>,
}

impl std::fmt::Debug for StandardBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardBackend")
            .field("installer_package", &self.installer_package)
            .field("commit_timeout", &self.commit_timeout)
            .finish_non_exhaustive()
    }
}

impl StandardBackend {
    pub fn new(
        installer: Arc<dyn PackageInstaller>,
        relay: StatusRelay,
        installer_package: impl Into<String>,
        commit_timeout: Option<Duration>,
    ) -> Self {
        Self {
            installer,
            relay,
            installer_package: installer_package.into(),
            commit_timeout,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Cancels whatever OS session this backend has open. Take it before the
    /// backend moves into its core.
    pub fn canceller(&self) -> SessionCanceller {
        SessionCanceller {
            installer: Arc::clone(&self.installer),
            relay: self.relay.clone(),
            current: Arc::clone(&self.current),
        }
    }

    fn set_current(&self, session: Option<i32>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn stage(&self, os_session: i32, files: &[PathBuf]) -> Result<(), InstallError> {
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| InstallError::context("Invalid APK path", path.display()))?;
            let mut input = File::open(path)?;
            let size = input.metadata()?.len();

            let mut out = self.installer.open_write(os_session, &name, size)?;
            io::copy(&mut input, &mut out)?;
            out.flush()?;
            out.fsync()?;
            tracing::debug!(os_session, name = %name, size, "Staged APK");
        }
        Ok(())
    }

    fn commit_and_wait(&self, os_session: i32) -> Result<SessionOutcome, InstallError> {
        // Registered first: the callback may fire before commit returns.
        let registration = self.relay.bus().register(os_session);
        self.installer
            .commit(os_session, self.relay.pending_intent(os_session))
            .map_err(|e| InstallError::context("Failed to commit installer session", e))?;

        let broadcast = match self.commit_timeout {
            Some(timeout) => match registration.recv_timeout(timeout) {
                Ok(b) => b,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if let Err(e) = self.installer.abandon(os_session) {
                        tracing::warn!(os_session, error = %e, "Failed to abandon timed out session");
                    }
                    return Err(InstallError::Timeout(os_session));
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return Err(InstallError::WorkerGone),
            },
            None => registration.recv().map_err(|_| InstallError::WorkerGone)?,
        };

        Ok(match broadcast.status {
            InstallStatus::Succeeded => SessionOutcome::Succeeded {
                package_name: broadcast.package_name,
            },
            _ => SessionOutcome::failed(
                broadcast
                    .error_description
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
            ),
        })
    }
}

impl InstallBackend for StandardBackend {
    fn install_files(
        &mut self,
        session: SessionId,
        files: &[PathBuf],
    ) -> Result<SessionOutcome, InstallError> {
        let params = SessionParams::full_install(&self.installer_package);
        let os_session = self
            .installer
            .create_session(&params)
            .map_err(|e| InstallError::context("Failed to create installer session", e))?;
        tracing::debug!(%session, os_session, files = files.len(), "Opened installer session");

        self.set_current(Some(os_session));
        // Incomplete sessions are garbage-collected by the OS; no abandon here.
        let result = self
            .stage(os_session, files)
            .and_then(|()| self.commit_and_wait(os_session));
        self.set_current(None);
        result
    }
}

/// Cancels the OS session of an ongoing standard install.
#[derive(Clone)]
pub struct SessionCanceller {
    installer: Arc<dyn PackageInstaller>,
    relay: StatusRelay,
    current: Arc<Mutex<Option<i32>>>,
}

impl std::fmt::Debug for SessionCanceller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCanceller").finish_non_exhaustive()
    }
}

impl SessionCanceller {
    /// Abandon the open OS session and report it aborted through the relay.
    ///
    /// Returns `false` if no OS session is open.
    pub fn cancel(&self) -> Result<bool, InstallError> {
        let Some(os_session) = *self.current.lock().unwrap_or_else(PoisonError::into_inner) else {
            return Ok(false);
        };
        self.installer
            .abandon(os_session)
            .map_err(|e| InstallError::context("Failed to abandon installer session", e))?;
        tracing::info!(os_session, "Installer session cancelled");
        self.relay
            .service()
            .handle(OsStatusIntent::new(os_session, OsStatus::FailureAborted));
        Ok(true)
    }
}
