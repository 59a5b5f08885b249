//! Error types for the RTSP streaming server.

use std::fmt;

use crate::auth::AuthError;

/// Errors that can occur in the RTSP server library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`UnsupportedTransport`](Self::UnsupportedTransport).
/// - **Auth**: [`AuthChallengeRequired`](Self::AuthChallengeRequired),
///   [`Auth`](Self::Auth). Both produce a `401` response, never a dropped connection.
/// - **Transport**: [`Io`](Self::Io), [`TlsHandshakeFailed`](Self::TlsHandshakeFailed),
///   [`PortRangeExhausted`](Self::PortRangeExhausted). Fatal to the session.
/// - **Media**: [`MalformedFrame`](Self::MalformedFrame). The frame is dropped,
///   sessions continue.
/// - **Server**: [`NotStarted`](Self::NotStarted), [`AlreadyRunning`](Self::AlreadyRunning),
///   [`MountNotFound`](Self::MountNotFound), [`InvalidConfig`](Self::InvalidConfig).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying socket or I/O failure.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The client asked for a lower transport other than RTP/AVP over UDP or TCP.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// The request needs credentials and none (or none valid) were supplied yet.
    #[error("authorization required")]
    AuthChallengeRequired,

    /// Credentials were supplied but could not be verified.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The encoded frame handed over by the media pipeline has no usable NAL units.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// The TLS server handshake failed or did not complete in time.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),

    /// TLS configuration was rejected or a session could not be created.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// No free even/odd UDP port pair above the requested base port.
    #[error("no free RTP/RTCP port pair at or above {0}")]
    PortRangeExhausted(u16),

    /// No mount registered at the requested path.
    #[error("mount not found: {0}")]
    MountNotFound(String),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Request bytes were not valid UTF-8.
    InvalidEncoding,
    /// `Content-Length` was not a number or exceeded the request size limit.
    InvalidContentLength,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidEncoding => write!(f, "request is not valid UTF-8"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
        }
    }
}

impl From<ParseErrorKind> for RtspError {
    fn from(kind: ParseErrorKind) -> Self {
        RtspError::Parse { kind }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
