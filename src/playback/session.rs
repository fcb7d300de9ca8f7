//! Playback sessions: server-side mirror of a browser's playback state.
//!
//! The authoritative clock stays in the browser; a session only records the
//! anchors so any window (or the server) can recompute position from them.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::error::{PlaybackError, PlaybackResult};
use super::state::PlaybackState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub dataset_id: String,
    pub state: PlaybackState,
    /// Wall-clock time of the last prefetch run for this session.
    pub last_prefetch_ms: Option<i64>,
    pub created_at: i64,
    /// Last create/sample/command/switch; drives idle expiry.
    pub last_seen_ms: i64,
}

impl Session {
    pub fn new(dataset_id: &str, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            dataset_id: dataset_id.to_string(),
            state: PlaybackState::default(),
            last_prefetch_ms: None,
            created_at: now_ms,
            last_seen_ms: now_ms,
        }
    }

    /// Select another dataset. Position resets to row 0, paused; speed is kept.
    pub fn switch_dataset(&mut self, dataset_id: &str) {
        let speed = self.state.speed();
        self.dataset_id = dataset_id.to_string();
        self.state = PlaybackState::paused_at(0, speed).unwrap_or_default();
        self.last_prefetch_ms = None;
    }
}

/// UUID-keyed sessions. Tabs that close without a `DELETE` are pruned once idle
/// longer than `idle_ttl_ms` (0 keeps sessions forever).
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Session>>,
    idle_ttl_ms: u64,
}

fn parse_id(id: &str) -> PlaybackResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| PlaybackError::SessionNotFound(id.to_string()))
}

impl SessionRegistry {
    pub fn new(idle_ttl_ms: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_ttl_ms,
        }
    }

    /// Register a new session, pruning idle ones first.
    pub fn create(&self, dataset_id: &str, now_ms: i64) -> Session {
        let session = Session::new(dataset_id, now_ms);
        let mut sessions = self.sessions.write();
        let expired = self.prune_locked(&mut sessions, now_ms);
        if expired > 0 {
            debug!(expired, "Idle playback sessions pruned");
        }
        sessions.insert(session.id, session.clone());
        session
    }

    /// Drop sessions idle longer than the TTL. Returns how many were removed.
    pub fn prune_idle(&self, now_ms: i64) -> usize {
        self.prune_locked(&mut self.sessions.write(), now_ms)
    }

    fn prune_locked(&self, sessions: &mut HashMap<Uuid, Session>, now_ms: i64) -> usize {
        if self.idle_ttl_ms == 0 {
            return 0;
        }
        let ttl = i64::try_from(self.idle_ttl_ms).unwrap_or(i64::MAX);
        let before = sessions.len();
        sessions.retain(|_, s| now_ms.saturating_sub(s.last_seen_ms) <= ttl);
        before - sessions.len()
    }

    pub fn get(&self, id: &str) -> PlaybackResult<Session> {
        let uuid = parse_id(id)?;
        self.sessions
            .read()
            .get(&uuid)
            .cloned()
            .ok_or_else(|| PlaybackError::SessionNotFound(id.to_string()))
    }

    /// Run `f` against the session under the write lock and mark it seen at `now_ms`.
    pub fn update<F, R>(&self, id: &str, now_ms: i64, f: F) -> PlaybackResult<R>
    where
        F: FnOnce(&mut Session) -> PlaybackResult<R>,
    {
        let uuid = parse_id(id)?;
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&uuid)
            .ok_or_else(|| PlaybackError::SessionNotFound(id.to_string()))?;
        session.last_seen_ms = session.last_seen_ms.max(now_ms);
        f(session)
    }

    pub fn remove(&self, id: &str) -> PlaybackResult<Session> {
        let uuid = parse_id(id)?;
        self.sessions
            .write()
            .remove(&uuid)
            .ok_or_else(|| PlaybackError::SessionNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
