//! Observer registration and event fan-out
//!
//! Observers are closures held in an [`ObserverList`]. Notification copies
//! the current observer set before calling into it, so a callback may add or
//! remove observers (including itself) without invalidating the iteration.

use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

use crate::contact::Contact;
use crate::types::PresenceModel;

/// Handle returned by [`ObserverList::add`], used to remove the observer later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

/// A copy-then-iterate list of event callbacks
pub struct ObserverList<E> {
    observers: RwLock<Vec<(ObserverId, Arc<dyn Fn(&E) + Send + Sync>)>>,
}

impl<E> ObserverList<E> {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer and return its removal handle
    pub fn add<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ObserverId(Uuid::new_v4());
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Remove a previously registered observer; unknown ids are a no-op
    pub fn remove(&self, id: ObserverId) {
        self.observers.write().retain(|(oid, _)| *oid != id);
    }

    /// Deliver one event to every observer registered at call time
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<_> = self
            .observers
            .read()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for cb in snapshot {
            cb(event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }
}

impl<E> Default for ObserverList<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Events emitted by a single contact
#[derive(Debug, Clone)]
pub enum ContactEvent {
    /// Presence changed for one URI-or-phone key of this contact
    PresenceReceivedFor {
        key: String,
        model: Option<PresenceModel>,
    },

    /// Aggregate notification that some presence of this contact changed
    PresenceReceived,
}

/// Events emitted by a contact list
#[derive(Debug, Clone)]
pub enum ListEvent {
    /// One decoded notification finished dispatching; `contacts` is the
    /// batch of members whose presence was updated
    PresenceReceived { contacts: Vec<Arc<Contact>> },

    /// A contact was auto-created from a notification on a bodyless
    /// aggregated subscription
    ContactCreated { contact: Arc<Contact> },
}
