//! Wire-session mailboxes for the streamable HTTP transport.
//!
//! A session buffers every event it emits so a reconnecting client can
//! replay what it missed via `Last-Event-ID`, and fans live events out
//! over a broadcast channel. Wire sessions identify connections, not
//! users; user state lives in the context registry.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::HeaderValue;
use axum::response::sse::Event;
use tokio::sync::{RwLock, broadcast};

/// Events kept per session for replay.
const EVENT_HISTORY: usize = 100;
/// Broadcast channel capacity for live delivery.
const CHANNEL_CAPACITY: usize = 64;
/// Sessions idle past this are dropped by the cleanup task.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(300);
/// Cleanup task period.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Opaque wire-session identifier carried in `Mcp-Session-Id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Header value for `Mcp-Session-Id`. Generated ids are hex; a
    /// client-supplied id with non-header bytes falls back to a marker.
    #[must_use]
    pub fn to_header_value(&self) -> HeaderValue {
        HeaderValue::from_str(&self.0).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One buffered server-to-client event.
#[derive(Debug, Clone)]
pub struct BufferedEvent {
    pub id: u64,
    pub event_type: String,
    pub data: String,
}

impl BufferedEvent {
    #[must_use]
    pub fn to_sse_event(&self) -> Event {
        Event::default().id(self.id.to_string()).event(&self.event_type).data(&self.data)
    }
}

/// A live wire session with its replay buffer.
pub struct Session {
    pub id: SessionId,
    sender: broadcast::Sender<BufferedEvent>,
    history: RwLock<VecDeque<BufferedEvent>>,
    next_event_id: AtomicU64,
    last_active: RwLock<Instant>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            id,
            sender,
            history: RwLock::new(VecDeque::with_capacity(EVENT_HISTORY)),
            next_event_id: AtomicU64::new(1),
            last_active: RwLock::new(Instant::now()),
        }
    }

    /// Buffer an event and broadcast it to live subscribers. Returns
    /// the assigned event id. Ids start at 1; `Last-Event-ID: 0` means
    /// "replay everything".
    pub async fn push_event(&self, event_type: impl Into<String>, data: impl Into<String>) -> u64 {
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let event = BufferedEvent { id, event_type: event_type.into(), data: data.into() };

        {
            let mut history = self.history.write().await;
            if history.len() >= EVENT_HISTORY {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // Send failure just means nobody is connected right now; the
        // event stays in history for replay.
        let _ = self.sender.send(event);
        self.touch().await;
        id
    }

    /// Buffered events with ids greater than `after`, oldest first.
    pub async fn events_after(&self, after: u64) -> Vec<BufferedEvent> {
        self.history.read().await.iter().filter(|e| e.id > after).cloned().collect()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BufferedEvent> {
        self.sender.subscribe()
    }

    pub async fn touch(&self) {
        *self.last_active.write().await = Instant::now();
    }

    pub async fn is_stale(&self, timeout: Duration) -> bool {
        self.last_active.read().await.elapsed() > timeout
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

/// Tracks live wire sessions by id.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    /// Create a session with a fresh id.
    pub async fn create(&self) -> Arc<Session> {
        let session = Arc::new(Session::new(SessionId::generate()));
        self.sessions.write().await.insert(session.id.clone(), Arc::clone(&session));
        tracing::debug!(session_id = %session.id, "Created wire session");
        session
    }

    /// Fetch the referenced session, or create one.
    ///
    /// An id we no longer hold (expired, or from before a restart) is
    /// resurrected with an empty buffer so reconnects degrade to a
    /// fresh stream instead of failing.
    pub async fn get_or_create(&self, id: Option<&str>) -> Arc<Session> {
        let Some(id) = id else {
            return self.create().await;
        };

        let key = SessionId::from(id);
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(&key) {
                let session = Arc::clone(session);
                drop(sessions);
                session.touch().await;
                return session;
            }
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Session::new(key)));
        Arc::clone(session)
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop sessions idle past `timeout`. Returns how many were dropped.
    pub async fn cleanup_stale(&self, timeout: Duration) -> usize {
        let mut stale = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, session) in sessions.iter() {
                if session.is_stale(timeout).await {
                    stale.push(id.clone());
                }
            }
        }

        let count = stale.len();
        if count > 0 {
            let mut sessions = self.sessions.write().await;
            for id in stale {
                sessions.remove(&id);
                tracing::debug!(session_id = %id, "Dropped stale wire session");
            }
        }
        count
    }

    /// Start the background cleanup task.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = self.cleanup_stale(SESSION_TIMEOUT).await;
                if removed > 0 {
                    tracing::debug!(count = removed, "Wire session cleanup completed");
                }
            }
        });
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish()
    }
}
