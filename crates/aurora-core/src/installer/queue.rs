//! Installer core - serialized session queue
//!
//! Queue state (pending sessions, FIFO backlog, ongoing session, listeners)
//! is owned by a dispatch thread and never shared. Handles talk to it over a
//! channel. Two more threads sit behind it: the install worker, which owns
//! the backend and runs one session at a time, and a cleanup worker that
//! deletes extraction caches so disk I/O never delays the next install.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

use aurora_schema::{InstallStatus, SESSION_ID_BASE, SessionId, StatusEvent};

use super::entry::QueueEntry;
use super::listener::{ListenerId, ListenerRegistry, StatusListener};
use super::{InstallBackend, SessionOutcome};
use crate::error::InstallError;

/// Commands handled by the dispatch thread
enum Command {
    /// Park a new entry until it is started
    Create(QueueEntry),
    /// Move a pending entry into the backlog
    Start(SessionId),
    /// Sent by the install worker once per job
    Completed {
        entry: QueueEntry,
        outcome: SessionOutcome,
    },
    AddListener {
        id: ListenerId,
        listener: Box<dyn StatusListener>,
    },
    RemoveListener(ListenerId),
    Ongoing(mpsc::Sender<Option<SessionId>>),
    BacklogLen(mpsc::Sender<usize>),
    Shutdown,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create(entry) => f.debug_tuple("Create").field(&entry.session_id()).finish(),
            Self::Start(id) => f.debug_tuple("Start").field(id).finish(),
            Self::Completed { entry, outcome } => f
                .debug_struct("Completed")
                .field("session", &entry.session_id())
                .field("outcome", outcome)
                .finish(),
            Self::AddListener { id, .. } => f
                .debug_struct("AddListener")
                .field("id", id)
                .finish_non_exhaustive(),
            Self::RemoveListener(id) => f.debug_tuple("RemoveListener").field(id).finish(),
            Self::Ongoing(_) => write!(f, "Ongoing"),
            Self::BacklogLen(_) => write!(f, "BacklogLen"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

struct Shared {
    name: String,
    commands: mpsc::Sender<Command>,
    next_session: AtomicU64,
    next_listener: AtomicU64,
    cache_root: PathBuf,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Last handle gone; ignore errors if already shut down
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Handle to one installer core. Cheap to clone; the threads stop when the
/// last clone is dropped or [`InstallerCore::shutdown`] is called.
#[derive(Clone)]
pub struct InstallerCore {
    shared: Arc<Shared>,
}

impl fmt::Debug for InstallerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallerCore")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl InstallerCore {
    /// Spawn the dispatch, install and cleanup threads for `backend`.
    ///
    /// Archive sessions extract below `cache_root`.
    pub fn spawn(
        name: &str,
        backend: Box<dyn InstallBackend>,
        cache_root: PathBuf,
    ) -> Result<Self, InstallError> {
        let (commands, receiver) = mpsc::channel();
        let (jobs, job_rx) = mpsc::channel();
        let (cleanup, cleanup_rx) = mpsc::channel();

        thread::Builder::new()
            .name(format!("{name}-cleanup"))
            .spawn(move || run_cleanup(&cleanup_rx))?;

        let worker_commands = commands.clone();
        thread::Builder::new()
            .name(format!("{name}-install"))
            .spawn(move || run_worker(backend, &job_rx, &worker_commands))?;

        let state = QueueState::new(name.to_string(), jobs, cleanup);
        thread::Builder::new()
            .name(format!("{name}-dispatch"))
            .spawn(move || run_dispatch(state, &receiver))?;

        Ok(Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                commands,
                next_session: AtomicU64::new(SESSION_ID_BASE),
                next_listener: AtomicU64::new(0),
                cache_root,
            }),
        })
    }

    fn send(&self, command: Command) -> Result<(), InstallError> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| InstallError::WorkerGone)
    }

    fn next_session_id(&self) -> SessionId {
        SessionId::new(self.shared.next_session.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn create(&self, entry: QueueEntry) -> Result<SessionId, InstallError> {
        let id = entry.session_id();
        self.send(Command::Create(entry))?;
        tracing::info!(core = %self.shared.name, session = %id, "Session created");
        Ok(id)
    }

    /// Register a session over already resolved APK files. Nothing runs until
    /// [`InstallerCore::start_session`].
    pub fn create_session(&self, files: Vec<PathBuf>) -> Result<SessionId, InstallError> {
        self.create(QueueEntry::from_files(files, self.next_session_id()))
    }

    /// Register a session over a zip of APKs, extracted when its turn comes.
    pub fn create_archive_session(&self, archive: PathBuf) -> Result<SessionId, InstallError> {
        let entry =
            QueueEntry::from_archive(archive, self.shared.cache_root.clone(), self.next_session_id());
        self.create(entry)
    }

    /// Queue a created session. Unknown or already started ids are ignored.
    pub fn start_session(&self, id: SessionId) -> Result<(), InstallError> {
        self.send(Command::Start(id))
    }

    pub fn add_listener(&self, listener: impl StatusListener + 'static) -> Result<ListenerId, InstallError> {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        self.send(Command::AddListener {
            id,
            listener: Box::new(listener),
        })?;
        Ok(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<(), InstallError> {
        self.send(Command::RemoveListener(id))
    }

    /// Session currently handed to the backend, if any.
    pub fn ongoing(&self) -> Result<Option<SessionId>, InstallError> {
        let (tx, rx) = mpsc::channel();
        self.send(Command::Ongoing(tx))?;
        rx.recv().map_err(|_| InstallError::WorkerGone)
    }

    /// Number of started sessions waiting behind the ongoing one.
    pub fn backlog_len(&self) -> Result<usize, InstallError> {
        let (tx, rx) = mpsc::channel();
        self.send(Command::BacklogLen(tx))?;
        rx.recv().map_err(|_| InstallError::WorkerGone)
    }

    /// Stop the dispatch thread. A session inside the backend is allowed to
    /// finish, but its status is no longer delivered.
    pub fn shutdown(&self) {
        let _ = self.shared.commands.send(Command::Shutdown);
    }
}

struct QueueState {
    name: String,
    pending: HashMap<SessionId, QueueEntry>,
    backlog: VecDeque<QueueEntry>,
    /// Some while a session is with the install worker
    ongoing: Option<SessionId>,
    listeners: ListenerRegistry,
    jobs: mpsc::Sender<QueueEntry>,
    cleanup: mpsc::Sender<QueueEntry>,
}

impl QueueState {
    fn new(name: String, jobs: mpsc::Sender<QueueEntry>, cleanup: mpsc::Sender<QueueEntry>) -> Self {
        Self {
            name,
            pending: HashMap::new(),
            backlog: VecDeque::new(),
            ongoing: None,
            listeners: ListenerRegistry::default(),
            jobs,
            cleanup,
        }
    }

    fn start(&mut self, id: SessionId) {
        let Some(entry) = self.pending.remove(&id) else {
            tracing::warn!(core = %self.name, session = %id, "Start requested for unknown session");
            return;
        };
        self.backlog.push_back(entry);
        tracing::info!(core = %self.name, session = %id, backlog = self.backlog.len(), "Session queued");
        self.listeners
            .dispatch(&StatusEvent::progress(id, InstallStatus::Queued));
        self.advance();
    }

    fn advance(&mut self) {
        while self.ongoing.is_none() {
            let Some(entry) = self.backlog.pop_front() else {
                return;
            };
            let id = entry.session_id();
            self.ongoing = Some(id);
            tracing::debug!(core = %self.name, session = %id, "Advancing queue");
            self.listeners
                .dispatch(&StatusEvent::progress(id, InstallStatus::Installing));

            if let Err(mpsc::SendError(entry)) = self.jobs.send(entry) {
                tracing::warn!(core = %self.name, session = %id, "Install worker is gone");
                self.completed(entry, SessionOutcome::failed(InstallError::WorkerGone.to_string()));
                return;
            }
        }
    }

    fn completed(&mut self, entry: QueueEntry, outcome: SessionOutcome) {
        let id = entry.session_id();
        if self.ongoing != Some(id) {
            tracing::warn!(core = %self.name, session = %id, ongoing = ?self.ongoing, "Completion for a session that is not ongoing");
        }

        let event = outcome.into_event(id);
        tracing::info!(
            core = %self.name,
            session = %id,
            status = %event.status,
            package = event.package_name.as_deref(),
            error = event.error.as_deref(),
            "Session finished"
        );
        self.listeners.dispatch(&event);
        self.ongoing = None;

        if let Err(mpsc::SendError(mut entry)) = self.cleanup.send(entry) {
            entry.clear();
        }
        self.advance();
    }
}

fn run_dispatch(mut state: QueueState, receiver: &mpsc::Receiver<Command>) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Create(entry) => {
                state.pending.insert(entry.session_id(), entry);
            }
            Command::Start(id) => state.start(id),
            Command::Completed { entry, outcome } => state.completed(entry, outcome),
            Command::AddListener { id, listener } => {
                state.listeners.add(id, listener);
                tracing::debug!(core = %state.name, listener = id.0, listeners = state.listeners.len(), "Listener registered");
            }
            Command::RemoveListener(id) => {
                state.listeners.remove(id);
            }
            Command::Ongoing(reply) => {
                let _ = reply.send(state.ongoing);
            }
            Command::BacklogLen(reply) => {
                let _ = reply.send(state.backlog.len());
            }
            Command::Shutdown => break,
        }
    }
    tracing::debug!(core = %state.name, "Dispatch loop stopped");
}

fn run_worker(
    mut backend: Box<dyn InstallBackend>,
    jobs: &mpsc::Receiver<QueueEntry>,
    commands: &mpsc::Sender<Command>,
) {
    for mut entry in jobs {
        let outcome = install_entry(backend.as_mut(), &mut entry);
        if let Err(mpsc::SendError(command)) = commands.send(Command::Completed { entry, outcome }) {
            if let Command::Completed { mut entry, .. } = command {
                entry.clear();
            }
            break;
        }
    }
}

fn install_entry(backend: &mut dyn InstallBackend, entry: &mut QueueEntry) -> SessionOutcome {
    let session = entry.session_id();
    let files = match entry.files() {
        Ok(files) => files.to_vec(),
        Err(e) => {
            tracing::warn!(%session, error = %e, "Failed to resolve session files");
            return SessionOutcome::failed(e.to_string());
        }
    };

    match panic::catch_unwind(AssertUnwindSafe(|| backend.install_files(session, &files))) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => SessionOutcome::failed(e.to_string()),
        Err(_) => {
            tracing::warn!(%session, "Installer backend panicked");
            SessionOutcome::failed("Installer backend panicked")
        }
    }
}

fn run_cleanup(entries: &mpsc::Receiver<QueueEntry>) {
    for mut entry in entries {
        entry.clear();
    }
}
