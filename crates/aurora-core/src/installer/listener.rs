use aurora_schema::StatusEvent;

/// Whether a listener stays registered after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retain {
    Keep,
    Remove,
}

/// Receives every status transition of an installer core.
///
/// Called on the core's dispatch thread, in transition order.
pub trait StatusListener: Send {
    fn on_status(&mut self, event: &StatusEvent) -> Retain;
}

impl<F> StatusListener for F
where
    F: FnMut(&StatusEvent) -> Retain + Send,
{
    fn on_status(&mut self, event: &StatusEvent) -> Retain {
        self(event)
    }
}

/// Handle for [`InstallerCore::remove_listener`](super::InstallerCore::remove_listener).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: Vec<(ListenerId, Box<dyn StatusListener>)>,
}

impl ListenerRegistry {
    pub(crate) fn add(&mut self, id: ListenerId, listener: Box<dyn StatusListener>) {
        self.listeners.push((id, listener));
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    pub(crate) fn dispatch(&mut self, event: &StatusEvent) {
        self.listeners.retain_mut(|(id, listener)| {
            let keep = listener.on_status(event) == Retain::Keep;
            if !keep {
                tracing::debug!(listener = id.0, session = %event.session_id, "Listener unregistered");
            }
            keep
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }
}
