//! Listener notification for nodes and factories.
//!
//! Subjects hold an explicit list of subscriber handles; events are delivered
//! synchronously and are fire-and-forget (a listener cannot veto or reorder
//! anything).

use std::fmt;
use std::sync::Arc;

/// Events emitted by nodes and factories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeEvent {
    /// An input value or state changed; carries the slot index.
    InputModified(usize),
    /// The dirty flag changed; carries the new value.
    StatusModified(bool),
    CaptionModified,
    DataModified,
}

/// Receives events from a [`Subject`].
pub trait Listener: Send + Sync {
    fn notify(&self, event: &NodeEvent);
}

/// A list of subscribers, injected into nodes/factories at construction.
#[derive(Clone, Default)]
pub struct Subject {
    listeners: Vec<Arc<dyn Listener>>,
}

impl Subject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.push(listener);
    }

    pub fn notify(&self, event: NodeEvent) {
        for listener in &self.listeners {
            listener.notify(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
