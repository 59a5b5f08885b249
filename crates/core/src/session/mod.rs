//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! Every RTSP connection owns exactly one session. The session record
//! tracks:
//!
//! - A unique session ID (hex string, returned in the `Session` header).
//! - The playback state: Init -> Ready -> Playing <-> Paused -> Terminated.
//! - Transport parameters negotiated during SETUP.
//! - The mount the session is attached to.
//!
//! ## Session lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! connect        -> Init
//! SETUP          -> Ready
//! PLAY           -> Playing
//! PAUSE          -> Paused   (from Playing)
//! PLAY           -> Playing  (from Paused)
//! TEARDOWN       -> Terminated
//! TCP disconnect -> Terminated (via cleanup)
//! ```
//!
//! The [`SessionManager`] keeps every live record so the hosting
//! application can list viewers, and forwards [`SessionStatus`] changes
//! to an optional listener.

pub mod transport;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

pub use transport::Transport;

static SESSION_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no transport yet.
    Init,
    /// Transport set up via SETUP, not yet playing.
    Ready,
    /// Media is being delivered.
    Playing,
    /// Delivery suspended; can resume via PLAY.
    Paused,
    /// Torn down. Final.
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Ready => "ready",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Session lifecycle notifications for the hosting application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// A client connected and its session was created.
    Started,
    /// SETUP completed.
    SetupDone,
    Playing,
    Paused,
    /// TEARDOWN or connection loss.
    Ended,
}

/// One notification delivered to the session listener.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session_id: String,
    pub peer: SocketAddr,
    pub status: SessionStatus,
}

/// Callback invoked on every [`SessionEvent`]. Runs on the connection thread.
pub type SessionListener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// A single RTSP session (RFC 2326 §3).
///
/// Created when a client connects, terminated by TEARDOWN or TCP
/// disconnect. Interior mutability via `RwLock` allows shared references
/// across threads; only the owning connection thread writes.
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier (16-char hex string).
    pub id: String,
    /// Client address of the RTSP connection.
    pub peer: SocketAddr,
    /// Mount path resolved at SETUP.
    pub mount: RwLock<Option<String>>,
    /// Transport parameters negotiated during SETUP (RFC 2326 §12.39).
    pub transport: RwLock<Option<Transport>>,
    /// Current playback state.
    pub state: RwLock<SessionState>,
    /// Session timeout in seconds (included in the `Session` response header).
    pub timeout_secs: u64,
}

impl Session {
    /// Create a new session with a unique ID: random high half, counter low half.
    pub fn new(peer: SocketAddr, timeout_secs: u64) -> Self {
        let counter = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        Session {
            id: format!("{:08X}{:08X}", rand::random::<u32>(), counter),
            peer,
            mount: RwLock::new(None),
            transport: RwLock::new(None),
            state: RwLock::new(SessionState::Init),
            timeout_secs,
        }
    }

    /// Set the transport parameters (called during SETUP).
    pub fn set_transport(&self, mount: &str, transport: Transport) {
        tracing::debug!(session_id = %self.id, mount, ?transport, "transport configured");
        *self.mount.write() = Some(mount.to_string());
        *self.transport.write() = Some(transport);
    }

    /// Returns a clone of the transport parameters, if configured.
    pub fn get_transport(&self) -> Option<Transport> {
        self.transport.read().clone()
    }

    pub fn get_mount(&self) -> Option<String> {
        self.mount.read().clone()
    }

    /// Transition to a new playback state.
    pub fn set_state(&self, state: SessionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), state);
        if old_state != state {
            tracing::info!(
                session_id = %self.id,
                %old_state,
                new_state = %state,
                "state transition"
            );
        }
    }

    /// Returns the current playback state.
    pub fn get_state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether this session is actively receiving media.
    pub fn is_playing(&self) -> bool {
        *self.state.read() == SessionState::Playing
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    ///
    /// Example: `"1A2B3C4D00000001;timeout=60"`
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }
}

/// Thread-safe registry of live sessions plus the status listener.
///
/// Backed by `parking_lot::RwLock` for fast concurrent reads.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    listener: Arc<RwLock<Option<SessionListener>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for a newly connected client and register it.
    pub fn create_session(&self, peer: SocketAddr, timeout_secs: u64) -> Arc<Session> {
        let session = Arc::new(Session::new(peer, timeout_secs));
        let id = session.id.clone();
        let total = {
            let mut sessions = self.sessions.write();
            sessions.insert(id.clone(), session.clone());
            sessions.len()
        };
        tracing::debug!(session_id = %id, %peer, total_sessions = total, "session created");

        self.notify(&session, SessionStatus::Started);
        session
    }

    /// Look up a session by ID.
    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove and return a session by ID.
    pub fn remove_session(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, total_sessions = sessions.len(), "session removed");
        }
        removed
    }

    /// Snapshot of all registered sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Returns all sessions currently in the [`SessionState::Playing`] state.
    pub fn get_playing_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_playing())
            .cloned()
            .collect()
    }

    pub fn set_listener(&self, listener: Option<SessionListener>) {
        *self.listener.write() = listener;
    }

    /// Deliver a status change to the listener, if any.
    pub fn notify(&self, session: &Session, status: SessionStatus) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener(&SessionEvent {
                session_id: session.id.clone(),
                peer: session.peer,
                status,
            });
        }
    }
}
