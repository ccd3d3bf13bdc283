//! OS callback relay
//!
//! The package installer reports a committed session by firing the
//! [`PendingIntent`] handed to it. The relay turns that raw status into an
//! [`InstallerBroadcast`] and delivers it on the [`BroadcastBus`] to whoever
//! registered for the OS session, which is normally the standard backend
//! blocked on the install worker.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::time::Duration;

use aurora_schema::{ACTION_INSTALLATION_STATUS_CHANGED, GENERIC_FAILURE, InstallerBroadcast, OsStatus};
use thiserror::Error;

/// Start the launched activity in a new task.
pub const FLAG_ACTIVITY_NEW_TASK: u32 = 0x1000_0000;

/// Opaque confirmation UI supplied by the OS with `PENDING_USER_ACTION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationIntent {
    pub action: String,
    pub flags: u32,
}

/// Raw status intent delivered by the OS package installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsStatusIntent {
    pub session_id: i32,
    /// Platform status code, see [`OsStatus::from_code`]
    pub status: i32,
    pub package_name: Option<String>,
    /// Platform status message, logged only
    pub message: Option<String>,
    pub confirmation: Option<ConfirmationIntent>,
}

impl OsStatusIntent {
    pub fn new(session_id: i32, status: OsStatus) -> Self {
        Self {
            session_id,
            status: status.code(),
            package_name: None,
            message: None,
            confirmation: None,
        }
    }

    pub fn with_package(mut self, package_name: impl Into<String>) -> Self {
        self.package_name = Some(package_name.into());
        self
    }

    pub fn with_confirmation(mut self, confirmation: ConfirmationIntent) -> Self {
        self.confirmation = Some(confirmation);
        self
    }
}

#[derive(Error, Debug)]
#[error("Failed to launch confirmation: {0}")]
pub struct LaunchError(pub String);

/// Starts the OS confirmation UI on behalf of the user.
pub trait ConfirmationLauncher: Send + Sync {
    fn launch(&self, intent: &ConfirmationIntent) -> Result<(), LaunchError>;
}

/// Callback target handed to the OS on commit.
#[derive(Clone)]
pub struct PendingIntent {
    relay: StatusRelay,
    session_id: i32,
}

impl fmt::Debug for PendingIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingIntent")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl PendingIntent {
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Fire the callback. Each call starts a fresh [`RelayService`].
    pub fn send(&self, intent: OsStatusIntent) {
        self.relay.service().handle(intent);
    }
}

#[derive(Default)]
struct BusState {
    next_token: u64,
    receivers: HashMap<i32, (u64, mpsc::Sender<InstallerBroadcast>)>,
}

/// Delivers broadcasts to the registration of their OS session.
#[derive(Clone, Default)]
pub struct BroadcastBus {
    state: Arc<Mutex<BusState>>,
}

impl fmt::Debug for BroadcastBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastBus").finish_non_exhaustive()
    }
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive broadcasts for `session_id` until the registration is dropped.
    /// A newer registration for the same session replaces this one.
    pub fn register(&self, session_id: i32) -> Registration {
        let (tx, rx) = mpsc::channel();
        let mut state = self.lock();
        state.next_token += 1;
        let token = state.next_token;
        state.receivers.insert(session_id, (token, tx));
        Registration {
            bus: self.clone(),
            session_id,
            token,
            receiver: rx,
        }
    }

    /// Returns whether a registration received it.
    pub fn publish(&self, broadcast: InstallerBroadcast) -> bool {
        let session_id = broadcast.session_id;
        tracing::debug!(
            action = ACTION_INSTALLATION_STATUS_CHANGED,
            session_id,
            status = broadcast.status.code(),
            "Publishing installer broadcast"
        );
        let state = self.lock();
        let delivered = state
            .receivers
            .get(&session_id)
            .is_some_and(|(_, tx)| tx.send(broadcast).is_ok());
        drop(state);
        if !delivered {
            tracing::warn!(session_id, "Dropping broadcast with no receiver");
        }
        delivered
    }

    pub fn is_registered(&self, session_id: i32) -> bool {
        self.lock().receivers.contains_key(&session_id)
    }
}

/// Unregisters from the bus on drop.
#[derive(Debug)]
pub struct Registration {
    bus: BroadcastBus,
    session_id: i32,
    token: u64,
    receiver: mpsc::Receiver<InstallerBroadcast>,
}

impl Registration {
    pub fn recv(&self) -> Result<InstallerBroadcast, mpsc::RecvError> {
        self.receiver.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<InstallerBroadcast, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut state = self.bus.lock();
        if state
            .receivers
            .get(&self.session_id)
            .is_some_and(|(token, _)| *token == self.token)
        {
            state.receivers.remove(&self.session_id);
        }
    }
}

/// Shared relay configuration; hands out one-shot [`RelayService`]s.
#[derive(Clone)]
pub struct StatusRelay {
    bus: BroadcastBus,
    launcher: Arc<dyn ConfirmationLauncher>,
}

impl fmt::Debug for StatusRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusRelay")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl StatusRelay {
    pub fn new(bus: BroadcastBus, launcher: Arc<dyn ConfirmationLauncher>) -> Self {
        Self { bus, launcher }
    }

    pub fn bus(&self) -> &BroadcastBus {
        &self.bus
    }

    pub fn pending_intent(&self, session_id: i32) -> PendingIntent {
        PendingIntent {
            relay: self.clone(),
            session_id,
        }
    }

    pub fn service(&self) -> RelayService {
        RelayService {
            bus: self.bus.clone(),
            launcher: Arc::clone(&self.launcher),
        }
    }
}

/// Handles exactly one status intent, then is gone.
pub struct RelayService {
    bus: BroadcastBus,
    launcher: Arc<dyn ConfirmationLauncher>,
}

impl fmt::Debug for RelayService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayService").finish_non_exhaustive()
    }
}

impl RelayService {
    pub fn handle(self, intent: OsStatusIntent) {
        let OsStatusIntent {
            session_id,
            status,
            package_name,
            message,
            confirmation,
        } = intent;
        let status = OsStatus::from_code(status);
        tracing::debug!(session_id, ?status, message = message.as_deref(), "Installer callback");

        match status {
            OsStatus::PendingUserAction => {
                let Some(mut confirmation) = confirmation else {
                    self.bus.publish(InstallerBroadcast::failure(
                        session_id,
                        package_name,
                        "Missing confirmation intent",
                    ));
                    return;
                };
                confirmation.flags |= FLAG_ACTIVITY_NEW_TASK;
                if let Err(e) = self.launcher.launch(&confirmation) {
                    tracing::warn!(session_id, error = %e, "Could not ask the user to confirm");
                    self.bus.publish(InstallerBroadcast::failure(
                        session_id,
                        package_name,
                        e.to_string(),
                    ));
                }
            }
            OsStatus::Success => {
                self.bus
                    .publish(InstallerBroadcast::success(session_id, package_name));
            }
            failure => {
                let description = failure.failure_description().unwrap_or(GENERIC_FAILURE);
                self.bus.publish(InstallerBroadcast::failure(
                    session_id,
                    package_name,
                    description,
                ));
            }
        }
    }
}
