//! Installer facade
//!
//! Owns one core per backend and routes every install to the one selected by
//! the current [`Preferences`](crate::prefs::Preferences). Each install gets
//! its own listener that mirrors the session into user notifications and
//! unregisters itself at the terminal state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aurora_schema::{GENERIC_FAILURE, InstallMethod, InstallStatus, SessionId, StatusEvent};
use walkdir::WalkDir;

use super::listener::{Retain, StatusListener};
use super::queue::InstallerCore;
use super::relay::{BroadcastBus, ConfirmationLauncher, StatusRelay};
use super::rooted::{self, RootedBackend};
use super::standard::{PackageInstaller, SessionCanceller, StandardBackend};
use crate::config::InstallerConfig;
use crate::error::InstallError;
use crate::prefs::PreferenceStore;
use crate::root::{RootProvider, SuProvider};

/// User-visible notifications for install progress.
pub trait Notifier: Send + Sync {
    fn cancel_downloading(&self, package: &str);
    fn show_installing(&self, package: &str);
    fn show_completed(&self, package: &str);
    fn show_failed(&self, package: &str, reason: &str);
}

/// Renders notifications as log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn cancel_downloading(&self, package: &str) {
        tracing::debug!(package, "Download notification cleared");
    }

    fn show_installing(&self, package: &str) {
        tracing::info!(package, "Installing");
    }

    fn show_completed(&self, package: &str) {
        tracing::info!(package, "Installed");
    }

    fn show_failed(&self, package: &str, reason: &str) {
        tracing::warn!(package, reason, "Installation failed");
    }
}

/// Platform services the installer is built on.
pub struct Platform {
    pub package_installer: Arc<dyn PackageInstaller>,
    pub launcher: Arc<dyn ConfirmationLauncher>,
    pub root: Arc<dyn RootProvider>,
}

impl Platform {
    /// Root through `config.root_command`, with every shell command bounded
    /// by the configured commit timeout.
    pub fn with_su(
        package_installer: Arc<dyn PackageInstaller>,
        launcher: Arc<dyn ConfirmationLauncher>,
        config: &InstallerConfig,
    ) -> Self {
        let su = SuProvider::new(&config.root_command).with_timeout(config.commit_timeout());
        Self {
            package_installer,
            launcher,
            root: Arc::new(su),
        }
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}

pub struct Installer {
    config: InstallerConfig,
    preferences: Arc<dyn PreferenceStore>,
    notifier: Arc<dyn Notifier>,
    relay: StatusRelay,
    root: Arc<dyn RootProvider>,
    standard: InstallerCore,
    rooted: InstallerCore,
    canceller: SessionCanceller,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("config", &self.config)
            .field("standard", &self.standard)
            .field("rooted", &self.rooted)
            .finish_non_exhaustive()
    }
}

impl Installer {
    /// Build both cores. Meant to be called once, by the application's
    /// composition root.
    pub fn new(
        config: InstallerConfig,
        preferences: Arc<dyn PreferenceStore>,
        notifier: Arc<dyn Notifier>,
        platform: Platform,
    ) -> Result<Self, InstallError> {
        let relay = StatusRelay::new(BroadcastBus::new(), platform.launcher);

        let standard_backend = StandardBackend::new(
            platform.package_installer,
            relay.clone(),
            &config.installer_package,
            config.commit_timeout(),
        );
        let canceller = standard_backend.canceller();
        let standard = InstallerCore::spawn(
            "standard",
            Box::new(standard_backend),
            config.cache_dir.clone(),
        )?;

        let rooted_backend =
            RootedBackend::new(Arc::clone(&platform.root), &config.installer_package, config.user);
        let rooted = InstallerCore::spawn("rooted", Box::new(rooted_backend), config.cache_dir.clone())?;

        Ok(Self {
            config,
            preferences,
            notifier,
            relay,
            root: platform.root,
            standard,
            rooted,
            canceller,
        })
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// Target for OS package-installer callbacks.
    pub fn relay(&self) -> &StatusRelay {
        &self.relay
    }

    pub fn core(&self, method: InstallMethod) -> &InstallerCore {
        match method {
            InstallMethod::Standard => &self.standard,
            InstallMethod::Root => &self.rooted,
        }
    }

    /// Install the downloaded APKs of `package` at `version_code`.
    pub fn install(&self, package: &str, version_code: u64) -> Result<SessionId, InstallError> {
        let files = resolve_apks(&self.config.download_dir, package, version_code)?;
        self.install_files(package, files)
    }

    /// Install an explicit set of split APKs.
    pub fn install_files(&self, package: &str, files: Vec<PathBuf>) -> Result<SessionId, InstallError> {
        let prefs = self.preferences.preferences();
        let staged = if prefs.delete_after_install {
            files.clone()
        } else {
            Vec::new()
        };
        let core = self.core(prefs.install_method);
        let session = core.create_session(files)?;
        self.watch(core, session, package, staged)?;
        tracing::info!(%session, package, method = %prefs.install_method, "Install requested");
        Ok(session)
    }

    /// Install a zip of split APKs.
    pub fn install_archive(&self, archive: &Path) -> Result<SessionId, InstallError> {
        let prefs = self.preferences.preferences();
        let label = archive
            .file_stem()
            .map_or_else(|| archive.display().to_string(), |s| s.to_string_lossy().into_owned());
        let core = self.core(prefs.install_method);
        let session = core.create_archive_session(archive.to_path_buf())?;
        self.watch(core, session, &label, Vec::new())?;
        tracing::info!(%session, archive = %archive.display(), method = %prefs.install_method, "Archive install requested");
        Ok(session)
    }

    /// Subscribe the notification listener, then start the session so the
    /// listener sees every transition.
    fn watch(
        &self,
        core: &InstallerCore,
        session: SessionId,
        package: &str,
        staged: Vec<PathBuf>,
    ) -> Result<(), InstallError> {
        core.add_listener(InstallListener {
            session,
            package: package.to_string(),
            staged,
            notifier: Arc::clone(&self.notifier),
        })?;
        core.start_session(session)
    }

    /// Cancel an ongoing standard install. Rooted installs and sessions that
    /// are not yet with the backend cannot be cancelled.
    pub fn cancel(&self, session: SessionId) -> Result<(), InstallError> {
        if self.standard.ongoing()? == Some(session) && self.canceller.cancel()? {
            return Ok(());
        }
        Err(InstallError::NotCancellable(session))
    }

    /// Uninstall `package` through a fresh root shell.
    pub fn uninstall(&self, package: &str) -> Result<(), InstallError> {
        let mut shell = self.root.acquire();
        if !shell.is_acquired() {
            return Err(InstallError::RootUnavailable);
        }
        let command = format!(
            "pm uninstall --user {} {}",
            self.config.user,
            rooted::shell_quote(package)
        );
        let output = rooted::exec_checked(&mut *shell, &command)?;
        if rooted::is_success(&output) {
            tracing::info!(package, "Uninstalled");
            Ok(())
        } else {
            Err(InstallError::Shell(output))
        }
    }
}

/// Files in `dir` belonging to `package` at `version_code`, sorted by name.
///
/// Matches `<package>.<version_code>.` anywhere in an `.apk` file name.
pub(crate) fn resolve_apks(dir: &Path, package: &str, version_code: u64) -> Result<Vec<PathBuf>, InstallError> {
    let needle = format!("{package}.{version_code}.");
    let files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            name.contains(&needle) && name.ends_with(".apk")
        })
        .map(walkdir::DirEntry::into_path)
        .collect();

    if files.is_empty() {
        return Err(InstallError::NoApks {
            package: package.to_string(),
            version_code,
        });
    }
    Ok(files)
}

struct InstallListener {
    session: SessionId,
    package: String,
    /// Deleted on success; empty unless the user asked for it
    staged: Vec<PathBuf>,
    notifier: Arc<dyn Notifier>,
}

impl StatusListener for InstallListener {
    fn on_status(&mut self, event: &StatusEvent) -> Retain {
        if event.session_id != self.session {
            return Retain::Keep;
        }
        match event.status {
            InstallStatus::Queued => Retain::Keep,
            InstallStatus::Installing => {
                self.notifier.cancel_downloading(&self.package);
                self.notifier.show_installing(&self.package);
                Retain::Keep
            }
            InstallStatus::Succeeded => {
                let package = event.package_name.as_deref().unwrap_or(&self.package);
                self.notifier.show_completed(package);
                for file in &self.staged {
                    if let Err(e) = std::fs::remove_file(file) {
                        tracing::warn!(file = %file.display(), error = %e, "Failed to delete installed APK");
                    }
                }
                Retain::Remove
            }
            InstallStatus::Failed => {
                let reason = event
                    .error
                    .as_deref()
                    .filter(|e| !e.is_empty())
                    .unwrap_or(GENERIC_FAILURE);
                self.notifier.show_failed(&self.package, reason);
                Retain::Remove
            }
        }
    }
}
