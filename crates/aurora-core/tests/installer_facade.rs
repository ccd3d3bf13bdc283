mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aurora_core::installer::relay::OsStatusIntent;
use aurora_core::{InstallError, Installer, MemoryPreferences, Platform, Preferences};
use aurora_schema::{InstallMethod, InstallStatus, OsStatus};

use common::{collect, events, FakePackageInstaller, FakePmRoot, RecordingLauncher, RecordingNotifier, Reply, TestContext};

struct Harness {
    ctx: TestContext,
    installer: Installer,
    package_installer: Arc<FakePackageInstaller>,
    launcher: Arc<RecordingLauncher>,
    notifier: Arc<RecordingNotifier>,
    prefs: Arc<MemoryPreferences>,
    root: Arc<FakePmRoot>,
}

fn harness(reply: Reply, prefs: Preferences) -> Harness {
    let ctx = TestContext::new();
    let package_installer = FakePackageInstaller::new(reply);
    let launcher = Arc::new(RecordingLauncher::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let prefs = Arc::new(MemoryPreferences::new(prefs));
    let root = FakePmRoot::new(&ctx.path().join("root"), 0);

    let installer = Installer::new(
        ctx.config.clone(),
        prefs.clone(),
        notifier.clone(),
        Platform {
            package_installer: package_installer.clone(),
            launcher: launcher.clone(),
            root: root.clone(),
        },
    )
    .unwrap();

    Harness {
        ctx,
        installer,
        package_installer,
        launcher,
        notifier,
        prefs,
        root,
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + common::WAIT;
    while !condition() {
        assert!(std::time::Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_install_resolves_downloads_and_notifies() {
    let h = harness(
        Reply::Success("org.example.app"),
        Preferences {
            install_method: InstallMethod::Standard,
            delete_after_install: true,
        },
    );
    let base = h.ctx.download("org.example.app.42.apk", b"base");
    let split = h.ctx.download("org.example.app.42.config.en.apk", b"en");
    let other = h.ctx.download("org.example.app.41.apk", b"old");

    let rx = events(h.installer.core(InstallMethod::Standard));
    let id = h.installer.install("org.example.app", 42).unwrap();
    let seen = collect(&rx, 1);
    assert_eq!(seen.last().unwrap().session_id, id);

    wait_for(|| h.notifier.calls().len() == 3);
    assert_eq!(
        h.notifier.calls(),
        vec![
            "cancel org.example.app",
            "installing org.example.app",
            "completed org.example.app"
        ]
    );
    assert_eq!(h.package_installer.staged.lock().unwrap().len(), 2);

    wait_for(|| !base.exists() && !split.exists());
    assert!(other.exists());
}

#[test]
fn test_install_without_downloads_is_an_error() {
    let h = harness(Reply::Success("org.example.app"), Preferences::default());
    let err = h.installer.install("org.example.app", 42).unwrap_err();
    assert!(matches!(err, InstallError::NoApks { .. }));
    assert!(h.notifier.calls().is_empty());
}

#[test]
fn test_preference_selects_backend_per_install() {
    let h = harness(Reply::Success("org.example.app"), Preferences::default());
    h.ctx.download("org.example.app.1.apk", b"base");

    let standard = events(h.installer.core(InstallMethod::Standard));
    h.installer.install("org.example.app", 1).unwrap();
    assert_eq!(collect(&standard, 1).last().unwrap().status, InstallStatus::Succeeded);
    assert_eq!(h.package_installer.committed.lock().unwrap().len(), 1);

    h.prefs.set(Preferences {
        install_method: InstallMethod::Root,
        delete_after_install: false,
    });
    let rooted = events(h.installer.core(InstallMethod::Root));
    h.installer.install("org.example.app", 1).unwrap();
    assert_eq!(collect(&rooted, 1).last().unwrap().status, InstallStatus::Succeeded);
    assert_eq!(h.package_installer.committed.lock().unwrap().len(), 1);
    assert_eq!(
        std::fs::read(h.root.staged("org.example.app.1.apk")).unwrap(),
        b"base"
    );
}

#[test]
fn test_rooted_commit_failure_is_notified_verbatim() {
    let h = harness(
        Reply::Hold,
        Preferences {
            install_method: InstallMethod::Root,
            delete_after_install: true,
        },
    );
    h.root.reject_commits();
    let apk = h.ctx.download("org.example.app.3.apk", b"base");

    let rx = events(h.installer.core(InstallMethod::Root));
    h.installer.install("org.example.app", 3).unwrap();
    let terminal = collect(&rx, 1).pop().unwrap();
    assert_eq!(terminal.status, InstallStatus::Failed);
    assert_eq!(
        terminal.error.as_deref(),
        Some("Failure [INSTALL_FAILED_INVALID_APK]")
    );

    wait_for(|| h.notifier.calls().len() == 3);
    assert_eq!(
        h.notifier.calls()[2],
        "failed org.example.app: Failure [INSTALL_FAILED_INVALID_APK]"
    );
    assert!(apk.exists());
}

#[test]
fn test_user_confirmation_round_trip() {
    let h = harness(Reply::Confirm, Preferences::default());
    h.ctx.download("org.example.app.5.apk", b"base");

    let rx = events(h.installer.core(InstallMethod::Standard));
    h.installer.install("org.example.app", 5).unwrap();

    wait_for(|| !h.launcher.launched.lock().unwrap().is_empty());
    let os_session = h.package_installer.committed.lock().unwrap()[0];
    h.installer.relay().service().handle(
        OsStatusIntent::new(os_session, OsStatus::Success).with_package("org.example.app"),
    );

    let terminal = collect(&rx, 1).pop().unwrap();
    assert_eq!(terminal.status, InstallStatus::Succeeded);
    assert_eq!(terminal.package_name.as_deref(), Some("org.example.app"));
}

#[test]
fn test_cancel_ongoing_standard_install() {
    let h = harness(Reply::Hold, Preferences::default());
    h.ctx.download("org.example.app.9.apk", b"base");
    h.ctx.download("org.example.app.10.apk", b"next");

    let rx = events(h.installer.core(InstallMethod::Standard));
    let first = h.installer.install("org.example.app", 9).unwrap();
    let second = h.installer.install("org.example.app", 10).unwrap();

    wait_for(|| !h.package_installer.committed.lock().unwrap().is_empty());
    assert!(matches!(
        h.installer.cancel(second),
        Err(InstallError::NotCancellable(id)) if id == second
    ));
    h.installer.cancel(first).unwrap();

    let seen = collect(&rx, 1);
    let terminal = seen.last().unwrap();
    assert_eq!(terminal.session_id, first);
    assert_eq!(terminal.error.as_deref(), Some("Installation was aborted"));
    assert_eq!(h.package_installer.abandoned.lock().unwrap().len(), 1);

    // The queue moves on to the second install.
    wait_for(|| h.package_installer.committed.lock().unwrap().len() == 2);
    h.installer.cancel(second).unwrap();
    assert_eq!(collect(&rx, 1).last().unwrap().session_id, second);
}

#[test]
fn test_rooted_install_is_not_cancellable() {
    let h = harness(
        Reply::Hold,
        Preferences {
            install_method: InstallMethod::Root,
            delete_after_install: false,
        },
    );
    h.ctx.download("org.example.app.1.apk", b"base");
    let id = h.installer.install("org.example.app", 1).unwrap();
    assert!(matches!(
        h.installer.cancel(id),
        Err(InstallError::NotCancellable(_))
    ));
}

#[test]
fn test_install_archive_through_facade() {
    let h = harness(Reply::Success("org.example.app"), Preferences::default());
    let archive = h.ctx.zip(
        "org.example.app.apks",
        &[("base.apk", Some(b"base")), ("split_config.de.apk", Some(b"de"))],
    );

    let rx = events(h.installer.core(InstallMethod::Standard));
    h.installer.install_archive(&archive).unwrap();
    assert_eq!(collect(&rx, 1).last().unwrap().status, InstallStatus::Succeeded);
    wait_for(|| h.notifier.calls().len() == 3);
    assert_eq!(h.notifier.calls()[1], "installing org.example.app");
    assert!(archive.exists());
}

#[test]
fn test_uninstall_through_root() {
    let h = harness(Reply::Hold, Preferences::default());
    h.installer.uninstall("org.example.app").unwrap();

    let err = h.installer.uninstall("org.missing").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Shell command failed: Failure [DELETE_FAILED_INTERNAL_ERROR]"
    );
    assert_eq!(
        h.root
            .acquisitions
            .load(std::sync::atomic::Ordering::SeqCst),
        2
    );
}

#[test]
fn test_uninstall_package_is_one_shell_word() {
    let h = harness(Reply::Hold, Preferences::default());
    h.installer
        .uninstall("org.example.app; touch pwned")
        .unwrap();
    h.installer
        .uninstall("org.example.app'; touch pwned2; '")
        .unwrap();
    h.installer.uninstall("$(touch pwned3)").unwrap();

    for marker in ["pwned", "pwned2", "pwned3"] {
        assert!(!h.root.dir().join(marker).exists(), "{marker}");
    }
}

#[test]
fn test_su_platform_uses_configured_root_command() {
    let ctx = TestContext::new();
    let build = |root_command: &str| {
        let config = aurora_core::InstallerConfig {
            root_command: root_command.to_string(),
            commit_timeout_secs: Some(5),
            ..ctx.config.clone()
        };
        let platform = Platform::with_su(
            FakePackageInstaller::new(Reply::Hold),
            Arc::new(RecordingLauncher::default()),
            &config,
        );
        Installer::new(
            config,
            Arc::new(MemoryPreferences::default()),
            Arc::new(RecordingNotifier::default()),
            platform,
        )
        .unwrap()
    };

    let missing = build("/nonexistent/aurora-su");
    assert!(matches!(
        missing.uninstall("org.example.app"),
        Err(InstallError::RootUnavailable)
    ));

    // A plain shell has no `pm`; the failure comes from its stderr.
    let plain = build("sh");
    let err = plain.uninstall("org.example.app").unwrap_err();
    assert!(matches!(err, InstallError::Shell(ref reason) if reason.contains("pm")), "{err}");
}
