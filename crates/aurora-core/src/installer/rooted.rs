//! Rooted backend - `pm install-*` over a superuser shell
//!
//! The shell does not reliably propagate exit codes, so results are read
//! from the command output: the session id is the first integer printed by
//! `install-create` and the commit succeeded if its output mentions
//! "success".

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use aurora_schema::SessionId;
use regex::Regex;

use super::{InstallBackend, SessionOutcome};
use crate::apk;
use crate::error::InstallError;
use crate::root::{RootProvider, Shell};

pub struct RootedBackend {
    provider: Arc<dyn RootProvider>,
    shell: Option<Box<dyn Shell>>,
    installer_package: String,
    user: u32,
}

impl std::fmt::Debug for RootedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootedBackend")
            .field("installer_package", &self.installer_package)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl RootedBackend {
    pub fn new(provider: Arc<dyn RootProvider>, installer_package: impl Into<String>, user: u32) -> Self {
        Self {
            provider,
            shell: None,
            installer_package: installer_package.into(),
            user,
        }
    }

    /// The current shell, re-acquired if the previous grant died.
    fn shell(&mut self) -> Result<&mut Box<dyn Shell>, InstallError> {
        let stale = self
            .shell
            .as_ref()
            .is_none_or(|s| s.is_terminated() || !s.is_acquired());
        if stale {
            tracing::debug!("Acquiring root shell");
            self.shell = Some(self.provider.acquire());
        }
        match self.shell.as_mut() {
            Some(shell) if shell.is_acquired() => Ok(shell),
            _ => Err(InstallError::RootUnavailable),
        }
    }
}

/// Run `command`, treating empty output as failure described by stderr.
pub(crate) fn exec_checked(shell: &mut dyn Shell, command: &str) -> Result<String, InstallError> {
    tracing::debug!(command, "Shell exec");
    match shell.exec(command) {
        Some(out) if !out.is_empty() => Ok(out),
        _ => {
            let reason = shell
                .read_error()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| format!("No output from `{command}`"));
            Err(InstallError::Shell(reason))
        }
    }
}

/// Quote `value` as one literal `sh` word.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

static SESSION_NUMBER: OnceLock<Result<Regex, String>> = OnceLock::new();

pub(crate) fn parse_session_id(output: &str) -> Result<i32, InstallError> {
    let re = SESSION_NUMBER
        .get_or_init(|| Regex::new(r"\d+").map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| InstallError::context("Invalid pattern", e))?;
    re.find(output)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| InstallError::Shell(format!("No session id in `{output}`")))
}

pub(crate) fn is_success(output: &str) -> bool {
    output.to_lowercase().contains("success")
}

impl InstallBackend for RootedBackend {
    fn install_files(
        &mut self,
        session: SessionId,
        files: &[PathBuf],
    ) -> Result<SessionOutcome, InstallError> {
        let mut sizes = Vec::with_capacity(files.len());
        for file in files {
            sizes.push(fs::metadata(file)?.len());
        }
        let total: u64 = sizes.iter().sum();

        let create = format!(
            "pm install-create -i {} --user {} -r -S {total}",
            self.installer_package, self.user
        );
        let shell: &mut dyn Shell = &mut **self.shell()?;

        let output = exec_checked(shell, &create)?;
        let os_session = parse_session_id(&output)?;
        tracing::debug!(%session, os_session, total, "Created shell install session");

        for (file, size) in files.iter().zip(sizes) {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| InstallError::context("Invalid APK path", file.display()))?;
            let write = format!(
                "cat {} | pm install-write -S {size} {os_session} {}",
                shell_quote(&file.to_string_lossy()),
                shell_quote(&name)
            );
            exec_checked(shell, &write)?;
        }

        let commit = exec_checked(shell, &format!("pm install-commit {os_session}"))?;
        if is_success(&commit) {
            Ok(SessionOutcome::Succeeded {
                package_name: apk::first_package_name(files),
            })
        } else {
            Ok(SessionOutcome::failed(commit))
        }
    }
}
