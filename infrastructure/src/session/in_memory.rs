//! In-process [`SessionStore`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use toolgate_application::SessionStore;
use toolgate_domain::util::truncate_str;
use toolgate_domain::{Session, SessionSummary, Turn};
use tracing::debug;

/// Default cap on the stored size of a turn's request or response text.
pub const DEFAULT_MAX_TURN_BYTES: usize = 4096;

type Slot = Arc<Mutex<Session>>;

/// Sessions held in memory for the lifetime of the process.
///
/// The map lock is held only to find a session's slot; each session has
/// its own lock, so appends to different sessions never wait on each
/// other and appends to the same session are serialized.
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Slot>>,
    max_turn_bytes: usize,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURN_BYTES)
    }
}

impl InMemorySessionStore {
    pub fn new(max_turn_bytes: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turn_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Slot>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Slot>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    fn truncate(&self, mut turn: Turn) -> Turn {
        if turn.request.len() > self.max_turn_bytes {
            turn.request = truncate_str(&turn.request, self.max_turn_bytes).to_string();
        }
        if turn.response.len() > self.max_turn_bytes {
            turn.response = truncate_str(&turn.response, self.max_turn_bytes).to_string();
        }
        turn
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, Session> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, id: Option<&str>, user_id: Option<&str>) -> Session {
        let id = match id {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        if let Some(slot) = self.read().get(&id) {
            let mut session = lock(slot);
            session.touch();
            return session.clone();
        }

        let mut sessions = self.write();
        let slot = sessions.entry(id.clone()).or_insert_with(|| {
            debug!(session = %id, "Session created");
            Arc::new(Mutex::new(Session::new(id.clone(), user_id)))
        });
        let mut session = lock(slot);
        session.touch();
        session.clone()
    }

    async fn append(&self, id: &str, turn: Turn) -> bool {
        let turn = self.truncate(turn);
        // The read guard stays held so a concurrent evict cannot remove the
        // session between lookup and push.
        let sessions = self.read();
        match sessions.get(id) {
            Some(slot) => {
                lock(slot).push_turn(turn);
                true
            }
            None => {
                debug!(session = %id, "Dropping turn for missing session");
                false
            }
        }
    }

    async fn evict(&self, older_than: DateTime<Utc>) -> usize {
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, slot| !lock(slot).is_idle_since(older_than));
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "Idle sessions evicted");
        }
        evicted
    }

    async fn get(&self, id: &str) -> Option<Session> {
        self.read().get(id).map(|slot| lock(slot).clone())
    }

    async fn list(&self, user_id: Option<&str>) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .read()
            .values()
            .map(|slot| lock(slot).summary())
            .filter(|s| user_id.is_none_or(|u| s.user_id == u))
            .collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        summaries
    }

    async fn delete(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }
}
