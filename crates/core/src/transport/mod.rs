//! Network transport layer for RTSP signaling and RTP media delivery.
//!
//! - **TCP** ([`tcp`]): the accept loop and one thread per RTSP
//!   connection. Requests are read from a [`SecureSocket`], which is
//!   plaintext or TLS (`rtsps://`).
//!
//! - **UDP** ([`udp`]): a bound RTP/RTCP port pair per client, searched
//!   upward from the configured base port.
//!
//! - **Interleaved** (RFC 2326 §10.12): RTP packets written onto the RTSP
//!   connection itself with `$` framing, through a [`PacketHandler`].
//!
//! A [`TransportContext`] wraps either delivery path for one client.

pub mod context;
pub mod secure;
pub mod tcp;
pub mod udp;

pub use context::{PacketHandler, TransportContext};
pub use secure::{PemSource, SecureSocket, TlsServer, TlsSettings};
pub use udp::{RTP_DEFAULT_PORT, UdpPortPair};
