use std::fs;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConnection, StreamOwned};
use sha2::{Digest, Sha256};

use crate::error::{Result, RtspError};

/// Largest plaintext written per TLS record.
const TLS_MAX_RECORD: usize = 16 * 1024;

/// Default bound on the TLS server handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Read timeout while handshaking; the deadline is rechecked this often.
const HANDSHAKE_POLL: Duration = Duration::from_millis(100);

/// PEM material, on disk or already in memory.
#[derive(Debug, Clone)]
pub enum PemSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl PemSource {
    fn load(&self) -> Result<Vec<u8>> {
        match self {
            PemSource::File(path) => Ok(fs::read(path)?),
            PemSource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    fn certificates(&self) -> Result<Vec<CertificateDer<'static>>> {
        let certs = CertificateDer::pem_slice_iter(&self.load()?)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RtspError::InvalidConfig(format!("bad certificate PEM: {e}")))?;
        if certs.is_empty() {
            return Err(RtspError::InvalidConfig("no certificate in PEM".into()));
        }
        Ok(certs)
    }
}

/// TLS configuration of the RTSP control channel (`rtsps://`).
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// Server certificate chain, leaf first.
    pub cert_chain: PemSource,
    /// PKCS#8, PKCS#1 or SEC1 private key of the leaf.
    pub private_key: PemSource,
    /// CA certificates that client certificates are checked against. When
    /// set, clients are asked for a certificate; sending none is allowed.
    pub client_ca: Option<PemSource>,
    /// Upper bound on the server handshake.
    pub handshake_timeout: Duration,
}

impl TlsSettings {
    pub fn pem(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self::new(PemSource::File(cert.into()), PemSource::File(key.into()))
    }

    pub fn pem_bytes(cert: Vec<u8>, key: Vec<u8>) -> Self {
        Self::new(PemSource::Bytes(cert), PemSource::Bytes(key))
    }

    fn new(cert_chain: PemSource, private_key: PemSource) -> Self {
        Self {
            cert_chain,
            private_key,
            client_ca: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_client_ca(mut self, ca: PemSource) -> Self {
        self.client_ca = Some(ca);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Loaded TLS identity, built once per server and shared by every connection.
#[derive(Clone)]
pub struct TlsServer {
    config: Arc<rustls::ServerConfig>,
    handshake_timeout: Duration,
}

impl TlsServer {
    pub fn from_settings(settings: &TlsSettings) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let certs = settings.cert_chain.certificates()?;
        let key = PrivateKeyDer::from_pem_slice(&settings.private_key.load()?)
            .map_err(|e| RtspError::InvalidConfig(format!("bad private key PEM: {e}")))?;

        let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;
        let builder = match &settings.client_ca {
            Some(ca) => builder.with_client_cert_verifier(client_verifier(ca, provider)?),
            None => builder.with_no_client_auth(),
        };
        let config = builder.with_single_cert(certs, key)?;

        Ok(Self {
            config: Arc::new(config),
            handshake_timeout: settings.handshake_timeout,
        })
    }

    /// Run the server handshake on a blocking socket, giving up after the
    /// configured timeout.
    fn handshake(&self, mut tcp: TcpStream) -> Result<TlsStream> {
        let deadline = Instant::now() + self.handshake_timeout;
        tcp.set_read_timeout(Some(HANDSHAKE_POLL))?;

        let mut conn = ServerConnection::new(self.config.clone())?;
        while conn.is_handshaking() {
            if Instant::now() >= deadline {
                return Err(RtspError::TlsHandshakeFailed(format!(
                    "timed out after {:?}",
                    self.handshake_timeout
                )));
            }
            match conn.complete_io(&mut tcp) {
                Ok(_) => {}
                Err(e) if is_timeout(&e) => {}
                Err(e) => return Err(RtspError::TlsHandshakeFailed(e.to_string())),
            }
        }
        Ok(StreamOwned::new(conn, tcp))
    }
}

/// Optional client authentication against `ca`.
fn client_verifier(
    ca: &PemSource,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>> {
    let mut roots = RootCertStore::empty();
    for cert in ca.certificates()? {
        roots.add(cert)?;
    }
    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
        .allow_unauthenticated()
        .build()
        .map_err(|e| RtspError::InvalidConfig(format!("client CA: {e}")))
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

type TlsStream = StreamOwned<ServerConnection, TcpStream>;

fn write_records(tls: &mut TlsStream, data: &[u8]) -> io::Result<()> {
    for chunk in data.chunks(TLS_MAX_RECORD) {
        tls.write_all(chunk)?;
    }
    tls.flush()
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl Stream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(tcp) => tcp,
            Stream::Tls(tls) => tls.get_ref(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.read(buf),
            Stream::Tls(tls) => tls.read(buf),
        }
    }
}

/// RTSP control connection, plaintext or TLS.
///
/// Shared through `Arc` by the connection's request loop and the
/// interleaved RTP packet handler. A mutex serializes reads and writes.
/// The reader waits for incoming bytes on a cloned handle without holding
/// the mutex, so interleaved media writes are never stuck behind an idle
/// read.
///
/// Writes are bounded by a timeout. A write that fails or times out leaves
/// the byte stream in an unknown state, so the socket is shut down and
/// every later `send` fails at once; the request loop then sees the close.
pub struct SecureSocket {
    stream: Mutex<Stream>,
    /// Same socket, used only to wait for readability.
    watcher: TcpStream,
    broken: AtomicBool,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    client_identity: Option<String>,
}

impl SecureSocket {
    /// Wrap an accepted connection, running the TLS handshake when `tls`
    /// is set.
    ///
    /// After the handshake the verified client certificate, if the client
    /// presented one, becomes the client identity `sha256:<hex fingerprint>`.
    pub fn accept(
        tcp: TcpStream,
        tls: Option<&TlsServer>,
        poll_interval: Duration,
        write_timeout: Duration,
    ) -> Result<Self> {
        let peer_addr = tcp.peer_addr()?;
        let local_addr = tcp.local_addr()?;
        tcp.set_nonblocking(false)?;
        tcp.set_nodelay(true)?;
        tcp.set_write_timeout(Some(write_timeout))?;

        let (stream, client_identity) = match tls {
            Some(tls) => {
                let stream = tls.handshake(tcp)?;
                let identity = stream
                    .conn
                    .peer_certificates()
                    .and_then(|chain| chain.first())
                    .map(|leaf| format!("sha256:{}", hex::encode(Sha256::digest(leaf))));
                tracing::debug!(
                    %peer_addr,
                    client_cert = identity.is_some(),
                    "TLS handshake complete"
                );
                (Stream::Tls(Box::new(stream)), identity)
            }
            None => (Stream::Plain(tcp), None),
        };

        stream.tcp().set_read_timeout(Some(poll_interval))?;
        let watcher = stream.tcp().try_clone()?;

        Ok(Self {
            stream: Mutex::new(stream),
            watcher,
            broken: AtomicBool::new(false),
            peer_addr,
            local_addr,
            client_identity,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        matches!(*self.stream.lock(), Stream::Tls(_))
    }

    pub fn is_client_cert_authenticated(&self) -> bool {
        self.client_identity.is_some()
    }

    /// Identity derived from the client certificate.
    pub fn client_cert_user_name(&self) -> Option<&str> {
        self.client_identity.as_deref()
    }

    /// Read available bytes. `Ok(0)` means the peer closed the connection;
    /// `WouldBlock`/`TimedOut` means nothing arrived within the poll interval.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.has_buffered_plaintext() {
            let mut byte = [0u8; 1];
            self.watcher.peek(&mut byte)?;
        }
        self.stream.lock().read(buf)
    }

    /// Decrypted bytes already held by the TLS session, for example a
    /// request that arrived together with the client's last handshake
    /// message. The socket shows nothing for those.
    fn has_buffered_plaintext(&self) -> bool {
        match &mut *self.stream.lock() {
            Stream::Plain(_) => false,
            Stream::Tls(tls) => match tls.conn.process_new_packets() {
                Ok(state) => state.plaintext_bytes_to_read() > 0,
                // Reported by the read that follows.
                Err(_) => true,
            },
        }
    }

    /// Write all of `data`, in record-sized pieces under TLS.
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        let mut stream = self.stream.lock();
        if self.broken.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection closed after a failed write",
            ));
        }
        let result = match &mut *stream {
            Stream::Plain(tcp) => tcp.write_all(data),
            Stream::Tls(tls) => write_records(tls, data),
        };
        if let Err(e) = &result {
            self.broken.store(true, Ordering::Release);
            tracing::warn!(
                peer_addr = %self.peer_addr,
                error = %e,
                "write failed, closing connection"
            );
            let _ = stream.tcp().shutdown(Shutdown::Both);
        }
        result
    }

    /// Close both directions. Errors are ignored; the peer may already be gone.
    pub fn shutdown(&self) {
        let mut stream = self.stream.lock();
        if let Stream::Tls(tls) = &mut *stream
            && !self.broken.load(Ordering::Acquire)
        {
            tls.conn.send_close_notify();
            let _ = tls.flush();
        }
        let _ = stream.tcp().shutdown(Shutdown::Both);
    }
}
