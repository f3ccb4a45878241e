use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use relay_core::ids::SessionId;

/// Arena of per-session async locks.
///
/// All mutations for one session serialize on its lock; different sessions
/// never contend. Entries are created on first use and removed when the
/// session is deleted.
#[derive(Default)]
pub(crate) struct SessionLocks {
    map: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        self.map
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn remove(&self, session_id: &SessionId) {
        self.map.remove(session_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }
}
