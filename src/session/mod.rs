//! Session registry for the streamable HTTP transport
//!
//! A session starts at the `initialize` handshake and is identified by an
//! opaque id the client echoes in the `Mcp-Session-Id` header. Sessions end
//! explicitly (DELETE / shutdown) or lapse after an idle timeout. Lapsed and
//! long-terminated records are purged by [`SessionRegistry::sweep`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{TransportError, TransportResult};

/// One client session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub active: bool,
    pub metadata: HashMap<String, Value>,
}

impl Session {
    /// Idle past the timeout, regardless of the active flag
    pub fn is_idle_expired(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    fn touch(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}

/// Serializable view of a session for diagnostics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub active: bool,
    pub expired: bool,
    pub created_at: DateTime<Utc>,
    pub idle_seconds: u64,
    pub metadata: HashMap<String, Value>,
}

/// Counts removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub purged: usize,
}

/// Thread-safe session table
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    timeout: Duration,
    retention: Duration,
}

impl SessionRegistry {
    pub fn new(timeout: Duration, retention: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
            retention,
        }
    }

    /// Generate a new session ID
    ///
    /// 128 bits from the OS CSPRNG rendered as lowercase hex, so the id is
    /// always a valid header token.
    pub fn generate_session_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Whether `id` only uses visible ASCII (0x21..=0x7E)
    pub fn is_well_formed_id(id: &str) -> bool {
        !id.is_empty() && id.bytes().all(|b| (0x21..=0x7e).contains(&b))
    }

    /// Create a new session
    pub fn create_session(&self, metadata: HashMap<String, Value>) -> Session {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let mut id = Self::generate_session_id();
        while sessions.contains_key(&id) {
            id = Self::generate_session_id();
        }

        let session = Session {
            id: id.clone(),
            created_at: Utc::now(),
            last_activity: now,
            active: true,
            metadata,
        };
        sessions.insert(id, session.clone());
        drop(sessions);

        info!(session_id = %session.id, "session created");
        session
    }

    /// Look up a live session and extend its idle window
    pub fn get_session(&self, id: &str) -> TransportResult<Session> {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(session) if session.active && !session.is_idle_expired(self.timeout, now) => {
                session.touch(now);
                Ok(session.clone())
            }
            Some(session) => {
                debug!(session_id = %id, active = session.active, "rejecting stale session");
                Err(TransportError::SessionNotFound)
            }
            None => Err(TransportError::SessionNotFound),
        }
    }

    /// Pure check; does not extend the idle window
    pub fn is_valid_session(&self, id: &str) -> bool {
        let now = Instant::now();
        self.sessions
            .read()
            .get(id)
            .is_some_and(|s| s.active && !s.is_idle_expired(self.timeout, now))
    }

    /// Mark a session inactive; returns whether a record existed
    pub fn terminate_session(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(session) => {
                let was_active = session.active;
                session.active = false;
                drop(sessions);
                if was_active {
                    info!(session_id = %id, "session terminated");
                }
                true
            }
            None => false,
        }
    }

    /// Terminate every active session (shutdown)
    pub fn terminate_all(&self) -> usize {
        let mut sessions = self.sessions.write();
        let mut count = 0;
        for session in sessions.values_mut().filter(|s| s.active) {
            session.active = false;
            count += 1;
        }
        count
    }

    /// Drop idle-expired sessions and terminated ones past the retention window
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let mut report = SweepReport::default();
        let mut sessions = self.sessions.write();

        sessions.retain(|_, session| {
            if session.active {
                if session.is_idle_expired(self.timeout, now) {
                    report.expired += 1;
                    return false;
                }
                true
            } else if session.is_idle_expired(self.retention, now) {
                report.purged += 1;
                false
            } else {
                true
            }
        });
        let remaining = sessions.len();
        drop(sessions);

        if report != SweepReport::default() {
            info!(
                expired = report.expired,
                purged = report.purged,
                remaining,
                "session sweep"
            );
        }
        report
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the task is aborted
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }

    /// Count of sessions that would pass [`is_valid_session`](Self::is_valid_session)
    pub fn active_count(&self) -> usize {
        let now = Instant::now();
        self.sessions
            .read()
            .values()
            .filter(|s| s.active && !s.is_idle_expired(self.timeout, now))
            .count()
    }

    /// Total records, including terminated and expired ones awaiting the sweep
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let now = Instant::now();
        let mut list: Vec<SessionSnapshot> = self
            .sessions
            .read()
            .values()
            .map(|s| SessionSnapshot {
                id: s.id.clone(),
                active: s.active,
                expired: s.is_idle_expired(self.timeout, now),
                created_at: s.created_at,
                idle_seconds: now.saturating_duration_since(s.last_activity).as_secs(),
                metadata: s.metadata.clone(),
            })
            .collect();
        list.sort_by_key(|s| s.created_at);
        list
    }
}
