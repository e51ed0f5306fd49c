//! The registry of active sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::session::{SessionHandle, SessionInfo};

/// Authoritative set of registered sessions, keyed by session id.
///
/// All methods take the lock for the duration of a map operation only; no
/// socket I/O happens under it. Callers that need to write to sessions take
/// a [`snapshot`](Self::snapshot) first.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
}

fn same_user(handle: &SessionHandle, username: &str) -> bool {
    handle.username().eq_ignore_ascii_case(username)
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session.
    ///
    /// Returns false, leaving the registry unchanged, if the id is already
    /// present.
    pub async fn insert(&self, handle: SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&handle.id()) {
            warn!("Session {} already registered", handle.id());
            return false;
        }
        let id = handle.id();
        sessions.insert(id, handle);
        debug!("Registered session {} (total: {})", id, sessions.len());
        true
    }

    /// Unregister a session. Returns the handle if it was still present.
    pub async fn remove(&self, id: Uuid) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&id);
        if removed.is_some() {
            debug!("Unregistered session {} (total: {})", id, sessions.len());
        }
        removed
    }

    /// Unregister every open session with the given username, compared
    /// ASCII case-insensitively like the ban list, and return their handles. Sessions already signalled to close are left for their
    /// own handler to remove.
    pub async fn remove_by_username(&self, username: &str) -> Vec<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        let ids: Vec<Uuid> = sessions
            .values()
            .filter(|handle| same_user(handle, username) && handle.is_open())
            .map(SessionHandle::id)
            .collect();
        ids.iter().filter_map(|id| sessions.remove(id)).collect()
    }

    /// Handles of every session with the given username, in any case.
    pub async fn find_by_username(&self, username: &str) -> Vec<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|handle| same_user(handle, username))
            .cloned()
            .collect()
    }

    /// Check if a user has at least one registered session.
    pub async fn is_user_connected(&self, username: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions.values().any(|handle| same_user(handle, username))
    }

    /// Copy of every handle, for fan-out outside the lock.
    pub async fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Remove and return every handle.
    pub async fn drain(&self) -> Vec<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        sessions.drain().map(|(_, handle)| handle).collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Information about every session, oldest connection first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .read()
            .await
            .values()
            .map(SessionHandle::info)
            .collect();
        infos.sort_by_key(|info| info.connected_at);
        infos
    }
}
