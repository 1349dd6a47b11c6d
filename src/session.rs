//! Conversation sessions.
//!
//! A [`SessionContext`] owns one conversation's bounded [`ChatHistory`].
//! The [`SessionStore`] maps session ids to contexts behind their own
//! `tokio::sync::Mutex`: a turn holds its session's lock for its whole
//! duration, so turns on the same session run one after another while
//! different sessions never contend.
//!
//! The store itself is bounded. Sessions not opened for `idle_ttl` are
//! dropped by [`SessionStore::evict_idle`] (run periodically by the server)
//! and before a new session is created; at `max_sessions` the least
//! recently opened idle session makes room. Sessions with a turn in flight
//! are never evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use campus_assistant_core::history::ChatHistory;
use campus_assistant_core::models::ChatTurn;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_SESSIONS: usize = 10_000;
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: String,
    pub history: ChatHistory,
}

impl SessionContext {
    pub fn new(id: impl Into<String>, history: ChatHistory) -> Self {
        Self {
            id: id.into(),
            history,
        }
    }

    /// Appends a completed exchange.
    pub fn record_exchange(&mut self, user: &str, assistant: &str) {
        self.history.record_exchange(user, assistant);
    }
}

pub type SharedSession = Arc<Mutex<SessionContext>>;

struct Slot {
    session: SharedSession,
    last_active: DateTime<Utc>,
}

impl Slot {
    /// Someone besides the store holds the session, i.e. a turn is running.
    fn is_busy(&self) -> bool {
        Arc::strong_count(&self.session) > 1
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Slot>>,
    max_turns: usize,
    max_sessions: usize,
    idle_ttl: Duration,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns,
            max_sessions: DEFAULT_MAX_SESSIONS,
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    pub fn with_limits(mut self, max_sessions: usize, idle_ttl: Duration) -> Self {
        self.max_sessions = max_sessions.max(1);
        self.idle_ttl = idle_ttl;
        self
    }

    /// Returns the session for `id`, creating it if needed.
    ///
    /// A new session (no id, or an id not seen before) is seeded with
    /// `seed`; an existing session keeps its own history and ignores it.
    pub async fn open(&self, id: Option<&str>, seed: &[ChatTurn]) -> SharedSession {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        if let Some(slot) = id.and_then(|id| sessions.get_mut(id)) {
            slot.last_active = now;
            return Arc::clone(&slot.session);
        }

        self.remove_idle(&mut sessions, now);
        self.make_room(&mut sessions);

        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!(session = %id, seeded = seed.len(), "opened session");
        let history = ChatHistory::from_turns(seed.iter().cloned(), self.max_turns);
        let session = Arc::new(Mutex::new(SessionContext::new(id.clone(), history)));
        sessions.insert(
            id,
            Slot {
                session: Arc::clone(&session),
                last_active: now,
            },
        );
        session
    }

    pub async fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|slot| Arc::clone(&slot.session))
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Drops sessions idle for longer than the TTL. Returns how many.
    pub async fn evict_idle(&self) -> usize {
        self.evict_idle_at(Utc::now()).await
    }

    async fn evict_idle_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        self.remove_idle(&mut sessions, now)
    }

    fn remove_idle(&self, sessions: &mut HashMap<String, Slot>, now: DateTime<Utc>) -> usize {
        let before = sessions.len();
        sessions.retain(|_, slot| {
            let idle = (now - slot.last_active)
                .to_std()
                .map_or(false, |age| age >= self.idle_ttl);
            slot.is_busy() || !idle
        });
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "evicted idle sessions");
        }
        removed
    }

    /// Evicts least recently active sessions until one more fits.
    fn make_room(&self, sessions: &mut HashMap<String, Slot>) {
        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .filter(|(_, slot)| !slot.is_busy())
                .min_by_key(|(_, slot)| slot.last_active)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    sessions.remove(&id);
                    debug!(session = %id, "evicted session at capacity");
                }
                None => {
                    warn!(sessions = sessions.len(), "session capacity reached with every session busy");
                    break;
                }
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}
