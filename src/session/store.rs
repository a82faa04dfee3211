//! In-memory registry of live sessions

use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::ModelConfig;

use super::{now_millis, ChatSession, SessionBackend};

pub type SharedSession = Arc<Mutex<ChatSession>>;

/// Sessions keyed by id; expired ones are dropped on access or by `prune_expired`
pub struct SessionStore {
    backend: SessionBackend,
    sessions: Arc<RwLock<HashMap<String, SharedSession>>>,
}

impl SessionStore {
    pub fn new(backend: SessionBackend) -> Self {
        Self {
            backend,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fetch a live session, refreshing it
    pub async fn get(&self, session_id: &str) -> Option<SharedSession> {
        let session = self.sessions.read().await.get(session_id).cloned()?;

        {
            let mut guard = session.lock().await;
            if !guard.is_expired(now_millis()) {
                guard.refresh();
                return Some(session.clone());
            }
        }

        debug!("Session {} expired", session_id);
        remove_if_current(&mut *self.sessions.write().await, session_id, &session);
        None
    }

    /// Fetch the session with `session_id`, or create one. A new session
    /// gets a fresh id when none is given.
    pub async fn get_or_create(
        &self,
        session_id: Option<&str>,
        model_config: Option<ModelConfig>,
    ) -> SharedSession {
        if let Some(id) = session_id {
            if let Some(session) = self.get(id).await {
                return session;
            }
        }

        let session = ChatSession::new(
            session_id.map(str::to_string),
            model_config,
            None,
            self.backend.clone(),
        );
        let id = session.session_id().to_string();
        info!("Created session {}", id);

        let shared = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, shared.clone());
        shared
    }

    pub async fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop every session past its max age; returns how many were removed
    pub async fn prune_expired(&self) -> usize {
        self.prune_expired_at(now_millis()).await
    }

    pub async fn prune_expired_at(&self, now: i64) -> usize {
        let snapshot: Vec<(String, SharedSession)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect();

        // A session locked right now is in use and is left alone.
        let expired: Vec<(String, SharedSession)> = snapshot
            .into_iter()
            .filter(|(_, session)| session.try_lock().map_or(false, |guard| guard.is_expired(now)))
            .collect();

        let mut sessions = self.sessions.write().await;
        let mut removed = 0;
        for (id, session) in &expired {
            // Re-check: a concurrent `get` may have refreshed it meanwhile.
            let still_expired = session.try_lock().map_or(false, |guard| guard.is_expired(now));
            if still_expired && remove_if_current(&mut sessions, id, session) {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Pruned {} expired session(s)", removed);
        }
        removed
    }
}

/// Remove `session_id` only if it still maps to `session`; another task may
/// have replaced the entry since it was read.
fn remove_if_current(
    sessions: &mut HashMap<String, SharedSession>,
    session_id: &str,
    session: &SharedSession,
) -> bool {
    match sessions.get(session_id) {
        Some(current) if Arc::ptr_eq(current, session) => {
            sessions.remove(session_id);
            true
        }
        _ => false,
    }
}
