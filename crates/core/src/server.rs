use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::auth::{self, AuthProvider, AuthScheme, CredentialStore};
use crate::error::{Result, RtspError};
use crate::media::PacketizationMode;
use crate::media::sink::RtpPacketizer;
use crate::mount::{Mount, MountRegistry};
use crate::session::{
    DEFAULT_SESSION_TIMEOUT_SECS, SessionListener, SessionManager, SessionState, Transport,
};
use crate::transport::tcp;
use crate::transport::{RTP_DEFAULT_PORT, TlsServer, TlsSettings};

/// Which clients must authenticate, and against what.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub scheme: AuthScheme,
    pub realm: String,
    pub credentials: Arc<CredentialStore>,
    /// Digest nonces older than this are answered with `stale=TRUE`.
    /// `None` keeps nonces valid for the life of the connection.
    pub nonce_lifetime: Option<Duration>,
}

impl AuthSettings {
    pub fn new(scheme: AuthScheme, credentials: Arc<CredentialStore>) -> Self {
        Self {
            scheme,
            realm: auth::DEFAULT_REALM.to_string(),
            credentials,
            nonce_lifetime: None,
        }
    }

    pub fn with_realm(mut self, realm: &str) -> Self {
        self.realm = realm.to_string();
        self
    }

    pub fn with_nonce_lifetime(mut self, lifetime: Duration) -> Self {
        self.nonce_lifetime = Some(lifetime);
        self
    }

    fn provider(&self) -> Arc<dyn AuthProvider> {
        auth::provider(
            self.scheme,
            &self.realm,
            self.credentials.clone(),
            self.nonce_lifetime,
        )
    }
}

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// RTSP listen address, e.g. `0.0.0.0:8554`.
    pub bind_addr: String,
    /// Public host advertised in SDP `o=` and `c=` lines.
    /// When `None`, host is inferred from the request URI, then the local address.
    pub public_host: Option<String>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
    /// First port tried for a client's server-side RTP/RTCP pair.
    pub rtp_base_port: u16,
    /// Upper bound on one blocking read of a connection. Bounds how long a
    /// connection thread takes to notice [`Server::stop`].
    pub read_poll_interval: Duration,
    /// A connection with no incoming bytes for this long is closed.
    pub session_timeout: Duration,
    /// Upper bound on one blocked write to a control connection. A client
    /// that stops reading its interleaved stream is dropped after this long
    /// instead of holding up the mount's other viewers.
    pub write_timeout: Duration,
    pub tls: Option<TlsSettings>,
    pub auth: Option<AuthSettings>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8554".to_string(),
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_name: "Stream".to_string(),
            rtp_base_port: RTP_DEFAULT_PORT,
            read_poll_interval: Duration::from_millis(50),
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            write_timeout: Duration::from_secs(2),
            tls: None,
            auth: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: &str) -> Self {
        Self {
            bind_addr: bind_addr.to_string(),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.read_poll_interval.is_zero() {
            return Err(RtspError::InvalidConfig(
                "read_poll_interval must be non-zero".into(),
            ));
        }
        if self.write_timeout.is_zero() {
            return Err(RtspError::InvalidConfig("write_timeout must be non-zero".into()));
        }
        if self.session_timeout < self.read_poll_interval {
            return Err(RtspError::InvalidConfig(
                "session_timeout must be at least read_poll_interval".into(),
            ));
        }
        if let Some(auth) = &self.auth
            && auth.credentials.is_empty()
        {
            tracing::warn!(realm = %auth.realm, "authentication enabled with no users");
        }
        Ok(())
    }
}

/// Everything a connection thread needs, shared by `Arc`.
pub(crate) struct ServerContext {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) mounts: MountRegistry,
    pub(crate) sessions: SessionManager,
    pub(crate) tls: Option<TlsServer>,
    pub(crate) auth: Option<Arc<dyn AuthProvider>>,
    pub(crate) running: Arc<AtomicBool>,
}

/// High-level RTSP server orchestrator.
///
/// Owns the mount registry and session manager. Delegates TCP connection
/// handling to [`transport::tcp`](crate::transport::tcp); RTP delivery runs
/// through each mount's [`RtpPacketizer`] when the media pipeline calls
/// [`push_frame`](Self::push_frame).
pub struct Server {
    config: Arc<ServerConfig>,
    sessions: SessionManager,
    mounts: MountRegistry,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            sessions: SessionManager::new(),
            mounts: MountRegistry::new(),
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            accept_thread: None,
        }
    }

    /// Register an H.264 mount with the mode's default MTU. The first mount
    /// added also serves unknown URL paths.
    pub fn add_mount(&self, path: &str, mode: PacketizationMode) -> Arc<Mount> {
        self.mounts.add(path, RtpPacketizer::h264(mode))
    }

    /// Register an H.264 mount with an explicit MTU.
    pub fn add_mount_with_mtu(
        &self,
        path: &str,
        mode: PacketizationMode,
        mtu: usize,
    ) -> Result<Arc<Mount>> {
        Ok(self.mounts.add(path, RtpPacketizer::h264_with_mtu(mode, mtu)?))
    }

    pub fn mount(&self, path: &str) -> Option<Arc<Mount>> {
        self.mounts.get(path)
    }

    pub fn mounts(&self) -> &MountRegistry {
        &self.mounts
    }

    /// Deliver one encoded access unit to every playing client of a mount.
    ///
    /// `timestamp_hns` is the presentation time in 100 ns units. Returns the
    /// number of RTP packets produced.
    pub fn push_frame(&self, path: &str, frame: &[u8], timestamp_hns: i64) -> Result<usize> {
        let mount = self
            .mounts
            .get(path)
            .ok_or_else(|| RtspError::MountNotFound(path.to_string()))?;
        mount.packetize_and_send(frame, timestamp_hns)
    }

    /// Supply SPS/PPS for a mount's SDP before the first keyframe arrives.
    pub fn set_parameter_sets(&self, path: &str, sequence_header: &[u8]) -> Result<()> {
        let mount = self
            .mounts
            .get(path)
            .ok_or_else(|| RtspError::MountNotFound(path.to_string()))?;
        mount.set_parameter_sets(sequence_header)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }
        self.config.validate()?;

        let tls = self
            .config
            .tls
            .as_ref()
            .map(TlsServer::from_settings)
            .transpose()?;
        let auth = self.config.auth.as_ref().map(AuthSettings::provider);

        let listener = TcpListener::bind(&self.config.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.running.store(true, Ordering::SeqCst);

        let context = Arc::new(ServerContext {
            config: self.config.clone(),
            mounts: self.mounts.clone(),
            sessions: self.sessions.clone(),
            tls,
            auth,
            running: self.running.clone(),
        });

        tracing::info!(
            addr = %local_addr,
            tls = context.tls.is_some(),
            auth = ?self.config.auth.as_ref().map(|a| a.scheme),
            "RTSP server listening"
        );

        self.local_addr = Some(local_addr);
        self.accept_thread = Some(thread::spawn(move || {
            tcp::accept_loop(listener, context);
        }));

        Ok(())
    }

    /// Stop accepting connections. Open connections close at their next read poll.
    pub fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(RtspError::NotStarted);
        }
        tracing::info!("server stopping");
        if let Some(handle) = self.accept_thread.take()
            && handle.join().is_err()
        {
            tracing::error!("accept loop panicked");
        }
        self.local_addr = None;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Register a callback for session lifecycle changes, or clear it with `None`.
    pub fn set_session_listener(&self, listener: Option<SessionListener>) {
        self.sessions.set_listener(listener);
    }

    /// Clients currently in the PLAY state.
    pub fn viewers(&self) -> Vec<Viewer> {
        self.sessions
            .get_playing_sessions()
            .iter()
            .filter_map(|session| {
                session.get_transport().map(|transport| Viewer {
                    session_id: session.id.clone(),
                    peer: session.peer,
                    mount: session.get_mount().unwrap_or_default(),
                    state: session.get_state(),
                    transport,
                })
            })
            .collect()
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Information about a connected viewer (client in PLAY state).
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    /// Address of the RTSP connection.
    pub peer: SocketAddr,
    pub mount: String,
    pub state: SessionState,
    pub transport: Transport,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig::new("127.0.0.1:0")
    }

    #[test]
    fn start_stop_lifecycle() {
        let mut server = Server::new(local_config());
        assert!(matches!(server.stop(), Err(RtspError::NotStarted)));

        server.start().unwrap();
        assert!(server.is_running());
        assert!(server.local_addr().is_some());
        assert!(matches!(server.start(), Err(RtspError::AlreadyRunning)));

        server.stop().unwrap();
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());
    }

    #[test]
    fn push_frame_unknown_mount() {
        let server = Server::new(local_config());
        server.add_mount("/cam", PacketizationMode::NonInterleaved);
        let err = server.push_frame("/other", &[0, 0, 0, 1, 0x65, 1], 0);
        assert!(matches!(err, Err(RtspError::MountNotFound(p)) if p == "/other"));
        assert_eq!(server.push_frame("/cam", &[0, 0, 0, 1, 0x65, 1], 0).unwrap(), 0);
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let mut server = Server::new(ServerConfig {
            read_poll_interval: Duration::ZERO,
            ..local_config()
        });
        assert!(matches!(server.start(), Err(RtspError::InvalidConfig(_))));
        assert!(!server.is_running());
    }

    #[test]
    fn rejects_zero_write_timeout() {
        let mut server = Server::new(ServerConfig {
            write_timeout: Duration::ZERO,
            ..local_config()
        });
        assert!(matches!(server.start(), Err(RtspError::InvalidConfig(_))));
    }

    #[test]
    fn tls_identity_errors_surface_on_start() {
        let mut server = Server::new(ServerConfig {
            tls: Some(TlsSettings::pem("/nonexistent/cert.pem", "/nonexistent/key.pem")),
            ..local_config()
        });
        assert!(matches!(server.start(), Err(RtspError::Io(_))));
        assert!(!server.is_running());
    }

    #[test]
    fn mtu_out_of_range() {
        let server = Server::new(local_config());
        assert!(server
            .add_mount_with_mtu("/small", PacketizationMode::SingleNal, 8)
            .is_err());
        let mount = server
            .add_mount_with_mtu("/ok", PacketizationMode::NonInterleaved, 1200)
            .unwrap();
        assert_eq!(mount.path(), "/ok");
    }

    #[test]
    fn no_viewers_before_play() {
        let server = Server::new(local_config());
        assert!(server.viewers().is_empty());
    }
}
