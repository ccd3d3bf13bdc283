#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use aurora_core::installer::relay::{
    ConfirmationIntent, ConfirmationLauncher, LaunchError, OsStatusIntent, PendingIntent,
};
use aurora_core::installer::{
    InstallerCore, Notifier, PackageInstaller, Retain, SessionParams, SessionWriter,
};
use aurora_core::root::{Root, RootProvider, Shell};
use aurora_core::InstallerConfig;
use aurora_schema::{OsStatus, SessionId, StatusEvent};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scratch directories laid out like a real installer home.
pub struct TestContext {
    pub temp_dir: TempDir,
    pub config: InstallerConfig,
}

impl TestContext {
    pub fn new() -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let root = temp_dir.path();
        let config = InstallerConfig {
            cache_dir: root.join("cache"),
            download_dir: root.join("downloads"),
            obb_dir: root.join("obb"),
            ..InstallerConfig::default()
        };
        std::fs::create_dir_all(&config.download_dir).expect("failed to create download dir");
        Self { temp_dir, config }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a fake APK into the download directory.
    pub fn download(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.config.download_dir.join(name);
        std::fs::write(&path, content).expect("failed to write apk");
        path
    }

    pub fn zip(&self, name: &str, entries: &[(&str, Option<&[u8]>)]) -> PathBuf {
        let path = self.path().join(name);
        let mut zip = zip::ZipWriter::new(File::create(&path).expect("failed to create zip"));
        for (entry, content) in entries {
            match content {
                Some(bytes) => {
                    zip.start_file(*entry, SimpleFileOptions::default()).unwrap();
                    zip.write_all(bytes).unwrap();
                }
                None => zip.add_directory(*entry, SimpleFileOptions::default()).unwrap(),
            }
        }
        zip.finish().unwrap();
        path
    }

    pub fn cache_is_empty(&self) -> bool {
        let dir = &self.config.cache_dir;
        !dir.exists() || std::fs::read_dir(dir).unwrap().next().is_none()
    }
}

/// Subscribe a listener that forwards every event.
pub fn events(core: &InstallerCore) -> mpsc::Receiver<StatusEvent> {
    let (tx, rx) = mpsc::channel();
    core.add_listener(move |e: &StatusEvent| {
        let _ = tx.send(e.clone());
        Retain::Keep
    })
    .unwrap();
    rx
}

/// Receive until `sessions` terminal events have been seen.
pub fn collect(rx: &mpsc::Receiver<StatusEvent>, sessions: usize) -> Vec<StatusEvent> {
    let mut seen = Vec::new();
    let mut terminals = 0;
    while terminals < sessions {
        let event = rx.recv_timeout(WAIT).expect("timed out waiting for status");
        if event.status.is_terminal() {
            terminals += 1;
        }
        seen.push(event);
    }
    seen
}

pub fn statuses_of(events: &[StatusEvent], id: SessionId) -> Vec<aurora_schema::InstallStatus> {
    events
        .iter()
        .filter(|e| e.session_id == id)
        .map(|e| e.status)
        .collect()
}

/// How the fake OS answers a commit.
#[derive(Debug, Clone)]
pub enum Reply {
    Success(&'static str),
    Fail(OsStatus),
    /// Ask for user confirmation; the test answers later
    Confirm,
    /// Never answer
    Hold,
}

struct MemoryWriter {
    session: i32,
    name: String,
    buf: Vec<u8>,
    staged: Arc<Mutex<HashMap<(i32, String), Vec<u8>>>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SessionWriter for MemoryWriter {
    fn fsync(&mut self) -> io::Result<()> {
        self.staged
            .lock()
            .unwrap()
            .insert((self.session, self.name.clone()), self.buf.clone());
        Ok(())
    }
}

/// In-memory package installer.
pub struct FakePackageInstaller {
    reply: Mutex<Reply>,
    next_session: AtomicI32,
    pub staged: Arc<Mutex<HashMap<(i32, String), Vec<u8>>>>,
    pub committed: Mutex<Vec<i32>>,
    pub abandoned: Mutex<Vec<i32>>,
}

impl FakePackageInstaller {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply),
            next_session: AtomicI32::new(100),
            staged: Arc::default(),
            committed: Mutex::default(),
            abandoned: Mutex::default(),
        })
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }
}

impl PackageInstaller for FakePackageInstaller {
    fn create_session(&self, _: &SessionParams) -> io::Result<i32> {
        Ok(self.next_session.fetch_add(1, Ordering::SeqCst))
    }

    fn open_write(&self, session: i32, name: &str, _: u64) -> io::Result<Box<dyn SessionWriter>> {
        Ok(Box::new(MemoryWriter {
            session,
            name: name.to_string(),
            buf: Vec::new(),
            staged: Arc::clone(&self.staged),
        }))
    }

    fn commit(&self, session: i32, callback: PendingIntent) -> io::Result<()> {
        self.committed.lock().unwrap().push(session);
        let reply = self.reply.lock().unwrap().clone();
        match reply {
            Reply::Success(package) => {
                callback.send(OsStatusIntent::new(session, OsStatus::Success).with_package(package));
            }
            Reply::Fail(status) => callback.send(OsStatusIntent::new(session, status)),
            Reply::Confirm => callback.send(
                OsStatusIntent::new(session, OsStatus::PendingUserAction).with_confirmation(
                    ConfirmationIntent {
                        action: "android.content.pm.action.CONFIRM_INSTALL".to_string(),
                        flags: 0,
                    },
                ),
            ),
            Reply::Hold => {}
        }
        Ok(())
    }

    fn abandon(&self, session: i32) -> io::Result<()> {
        self.abandoned.lock().unwrap().push(session);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    pub launched: Mutex<Vec<ConfirmationIntent>>,
}

impl ConfirmationLauncher for RecordingLauncher {
    fn launch(&self, intent: &ConfirmationIntent) -> Result<(), LaunchError> {
        self.launched.lock().unwrap().push(intent.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn cancel_downloading(&self, package: &str) {
        self.calls.lock().unwrap().push(format!("cancel {package}"));
    }
    fn show_installing(&self, package: &str) {
        self.calls.lock().unwrap().push(format!("installing {package}"));
    }
    fn show_completed(&self, package: &str) {
        self.calls.lock().unwrap().push(format!("completed {package}"));
    }
    fn show_failed(&self, package: &str, reason: &str) {
        self.calls.lock().unwrap().push(format!("failed {package}: {reason}"));
    }
}

/// A `/bin/sh` "root" whose PATH starts with a fake `pm`.
///
/// The fake stages `install-write` input into `<dir>/staged/<name>` and
/// answers like the real tool. The first `fail_first` acquisitions fail.
pub struct FakePmRoot {
    dir: PathBuf,
    fail_first: usize,
    pub acquisitions: AtomicUsize,
}

const FAKE_PM: &str = r#"#!/bin/sh
case "$1" in
  install-create)
    echo "Success: created install session [4242]"
    ;;
  install-write)
    cat > "$AURORA_STAGE/$5"
    echo "Success: streamed $3 bytes"
    ;;
  install-commit)
    if [ -e "$AURORA_STAGE/reject" ]; then
      echo "Failure [INSTALL_FAILED_INVALID_APK]"
    else
      echo "Success"
    fi
    ;;
  uninstall)
    if [ "$4" = "org.missing" ]; then
      echo "Failure [DELETE_FAILED_INTERNAL_ERROR]"
    else
      echo "Success"
    fi
    ;;
  *)
    echo "Unknown command: $1" >&2
    ;;
esac
"#;

impl FakePmRoot {
    pub fn new(dir: &Path, fail_first: usize) -> Arc<Self> {
        use std::os::unix::fs::PermissionsExt;

        let bin = dir.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::create_dir_all(dir.join("staged")).unwrap();
        let pm = bin.join("pm");
        std::fs::write(&pm, FAKE_PM).unwrap();
        std::fs::set_permissions(&pm, std::fs::Permissions::from_mode(0o755)).unwrap();

        Arc::new(Self {
            dir: dir.to_path_buf(),
            fail_first,
            acquisitions: AtomicUsize::new(0),
        })
    }

    /// The working directory of every shell handed out.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn staged(&self, name: &str) -> PathBuf {
        self.dir.join("staged").join(name)
    }

    /// Make the next commits fail.
    pub fn reject_commits(&self) {
        std::fs::write(self.dir.join("staged").join("reject"), b"").unwrap();
    }
}

impl RootProvider for FakePmRoot {
    fn acquire(&self) -> Box<dyn Shell> {
        let n = self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Box::new(Root::acquire("/nonexistent/su"));
        }
        let mut root = Root::acquire("sh");
        root.exec(&format!(
            "cd \"{}\"; export PATH=\"{}:$PATH\"; export AURORA_STAGE=\"{}\"",
            self.dir.display(),
            self.dir.join("bin").display(),
            self.dir.join("staged").display()
        ));
        Box::new(root)
    }
}
