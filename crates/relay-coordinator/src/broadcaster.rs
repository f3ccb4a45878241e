//! Per-session pub/sub hub.
//!
//! Subscribers join a session's group and receive every event published
//! for that session, in publish order. Reconnecting subscribers recover
//! missed state by pulling a snapshot, not by replaying events; events
//! are not logged.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use relay_core::events::SessionEvent;
use relay_core::ids::{SessionId, SubscriberId};
use relay_core::session::{PendingQuestion, Session};
use relay_store::{SessionStore, StoreError};

/// What a reconnecting subscriber gets: the current truth, whole.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSnapshot {
    pub session: Session,
    pub pending_questions: Vec<PendingQuestion>,
}

pub struct Broadcaster {
    store: Arc<dyn SessionStore>,
    groups: DashMap<SessionId, DashMap<SubscriberId, mpsc::Sender<SessionEvent>>>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn SessionStore>, capacity: usize) -> Self {
        Self {
            store,
            groups: DashMap::new(),
            capacity,
        }
    }

    /// Add a subscriber to a session's group. Takes effect for subsequent
    /// publishes only; no retroactive delivery.
    pub fn join(&self, session_id: &SessionId) -> (SubscriberId, mpsc::Receiver<SessionEvent>) {
        let id = SubscriberId::new();
        let (tx, rx) = mpsc::channel(self.capacity);
        self.groups
            .entry(session_id.clone())
            .or_default()
            .insert(id.clone(), tx);
        (id, rx)
    }

    pub fn leave(&self, session_id: &SessionId, subscriber_id: &SubscriberId) {
        if let Some(group) = self.groups.get(session_id) {
            group.remove(subscriber_id);
        }
    }

    /// Deliver an event to every current member of the session's group.
    /// A slow subscriber's full queue drops the event for that subscriber
    /// only; it never blocks the publisher or its peers.
    pub fn publish(&self, session_id: &SessionId, event: SessionEvent) {
        let Some(group) = self.groups.get(session_id) else {
            return;
        };

        let mut dead = Vec::new();
        for entry in group.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        session_id = %session_id,
                        subscriber_id = %entry.key(),
                        event_type = event.event_type(),
                        "subscriber queue full, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(entry.key().clone());
                }
            }
        }

        for id in dead {
            group.remove(&id);
        }
    }

    /// Pull the current session snapshot for late-join resynchronization.
    pub fn resync(&self, session_id: &SessionId) -> Result<SessionSnapshot, StoreError> {
        let session = self.store.get(session_id)?;
        let pending_questions = self.store.list_questions(session_id)?;
        Ok(SessionSnapshot {
            session,
            pending_questions,
        })
    }

    /// Tear down a session's group, disconnecting all members. Used when
    /// the session is deleted.
    pub fn drop_group(&self, session_id: &SessionId) {
        self.groups.remove(session_id);
    }

    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.groups.get(session_id).map_or(0, |g| g.len())
    }
}
