//! Change notifications for repository roots.
//!
//! After each successful transaction every root whose `current` moved is
//! published once as a [`ChangeEvent`]. Consumers either subscribe to a
//! broadcast stream (optionally filtered to a subtree) or register a
//! synchronous listener callback.

use std::sync::{Arc, RwLock};

use arbor_types::ObjectId;
use tokio::sync::broadcast;

use crate::paths;

/// A root's `current` commit moved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub root: String,
    pub hash: ObjectId,
}

/// Filter for subscribing to a subset of change events.
#[derive(Clone, Debug, Default)]
pub struct ChangeFilter {
    /// If set, only roots equal to or nested below this path are delivered.
    pub under: Option<String>,
}

impl ChangeFilter {
    pub fn under(path: impl Into<String>) -> Self {
        Self {
            under: Some(path.into()),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match &self.under {
            Some(prefix) => {
                event.root == *prefix || paths::strip_root(&event.root, prefix).is_some()
            }
            None => true,
        }
    }
}

/// Receiving end of a change subscription.
pub type ChangeStream = broadcast::Receiver<ChangeEvent>;

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Subscriber {
    filter: ChangeFilter,
    sender: broadcast::Sender<ChangeEvent>,
}

/// Fan-out of change events to streams and listeners.
pub(crate) struct ChangeBus {
    subscribers: RwLock<Vec<Subscriber>>,
    listeners: RwLock<Vec<Listener>>,
    capacity: usize,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> ChangeStream {
        let (sender, rx) = broadcast::channel(self.capacity);
        self.subscribers
            .write()
            .expect("bus lock poisoned")
            .push(Subscriber { filter, sender });
        rx
    }

    pub fn on_change(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) {
        self.listeners
            .write()
            .expect("bus lock poisoned")
            .push(Arc::new(listener));
    }

    /// Deliver one event. Streams whose receivers are gone are pruned.
    pub fn publish(&self, event: &ChangeEvent) {
        self.subscribers
            .write()
            .expect("bus lock poisoned")
            .retain(|sub| {
                if sub.filter.matches(event) {
                    sub.sender.send(event.clone()).is_ok()
                } else {
                    sub.sender.receiver_count() > 0
                }
            });
        // listeners may call back into the filesystem; run them unlocked
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .expect("bus lock poisoned")
            .clone();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("bus lock poisoned").len()
    }
}
