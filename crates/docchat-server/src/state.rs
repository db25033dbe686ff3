//! Shared application state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use docchat_core::{AppConfig, Error, Result};
use docchat_session::{ChatSession, Orchestrator};

pub type SessionHandle = Arc<Mutex<ChatSession>>;

struct SessionEntry {
    handle: SessionHandle,
    last_used: Instant,
}

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Orchestrator,
    sessions: DashMap<String, SessionEntry>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, orchestrator: Orchestrator) -> Self {
        Self {
            config,
            orchestrator,
            sessions: DashMap::new(),
        }
    }

    /// Start a fresh session and return its handle.
    pub fn create_session(&self) -> (String, SessionHandle) {
        let id = uuid::Uuid::new_v4().to_string();
        let handle = Arc::new(Mutex::new(ChatSession::new(id.clone())));
        self.sessions.insert(
            id.clone(),
            SessionEntry {
                handle: handle.clone(),
                last_used: Instant::now(),
            },
        );
        (id, handle)
    }

    /// Look up a session and mark it as used.
    pub fn session(&self, id: &str) -> Result<SessionHandle> {
        self.sessions
            .get_mut(id)
            .map(|mut entry| {
                entry.last_used = Instant::now();
                entry.handle.clone()
            })
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))
    }

    /// Drop a session. A session in the middle of a turn is kept (`Busy`).
    pub fn remove_session(&self, id: &str) -> Result<()> {
        if !self.sessions.contains_key(id) {
            return Err(Error::NotFound(format!("session {}", id)));
        }
        self.sessions
            .remove_if(id, |_, entry| entry.handle.try_lock().is_ok())
            .map(|_| ())
            .ok_or(Error::Busy)
    }

    /// Drop sessions untouched for at least `idle`, except ones mid-turn.
    /// Returns how many were removed.
    pub fn sweep_idle(&self, idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|id, entry| {
            let keep = entry.last_used.elapsed() < idle || entry.handle.try_lock().is_err();
            if !keep {
                debug!("Expiring idle session {}", id);
            }
            keep
        });
        before.saturating_sub(self.sessions.len())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Periodically expire idle sessions. Does nothing when `idle` is zero.
pub fn spawn_session_sweeper(state: Arc<AppState>, idle: Duration) {
    if idle.is_zero() {
        return;
    }
    let period = (idle / 4).clamp(Duration::from_secs(1), Duration::from_secs(300));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let removed = state.sweep_idle(idle);
            if removed > 0 {
                info!("Expired {} idle sessions ({} active)", removed, state.session_count());
            }
        }
    });
}
