use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use super::context::PacketHandler;
use super::secure::SecureSocket;
use crate::error::{ParseErrorKind, Result};
use crate::protocol::handler::RtspSession;
use crate::protocol::request::RtspRequest;
use crate::server::ServerContext;

/// Requests larger than this (headers plus body) close the connection.
const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub(crate) fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>) {
    while ctx.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                let ctx = ctx.clone();
                thread::spawn(move || {
                    Connection::handle(stream, peer_addr, ctx);
                });
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if ctx.running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// Packet handler that writes RTP onto the RTSP connection as
/// `$ <channel> <len:u16 BE> <packet>` (RFC 2326 §10.12).
pub fn interleaved_handler(socket: Arc<SecureSocket>, channel: u8) -> PacketHandler {
    Arc::new(move |packet: &[u8]| {
        let len = u16::try_from(packet.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "RTP packet too large for an interleaved frame",
            )
        })?;
        let mut frame = Vec::with_capacity(packet.len() + 4);
        frame.push(b'$');
        frame.push(channel);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(packet);
        socket.send(&frame)
    })
}

/// One complete unit pulled off the connection's byte stream.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    /// Text of a request, headers plus body.
    Request(String),
    /// A request whose bytes could not be decoded; answered with `400`.
    Malformed(ParseErrorKind),
}

/// Splits the RTSP connection's byte stream into requests.
///
/// Interleaved `$` frames sent by the client (RTCP receiver reports) are
/// dropped. A request ends at the blank line, plus `Content-Length` body
/// bytes when present.
#[derive(Debug, Default)]
struct RequestReader {
    buf: Vec<u8>,
}

impl RequestReader {
    fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete request, `None` when more bytes are needed.
    fn next_inbound(&mut self) -> Result<Option<Inbound>> {
        loop {
            let skip = self
                .buf
                .iter()
                .position(|b| !matches!(b, b'\r' | b'\n'))
                .unwrap_or(self.buf.len());
            self.buf.drain(..skip);

            match self.buf.first() {
                None => return Ok(None),
                Some(b'$') => {
                    if self.buf.len() < 4 {
                        return Ok(None);
                    }
                    let len = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
                    if self.buf.len() < 4 + len {
                        return Ok(None);
                    }
                    tracing::trace!(channel = self.buf[1], len, "skipped interleaved frame");
                    self.buf.drain(..4 + len);
                }
                Some(_) => return self.next_request(),
            }
        }
    }

    fn next_request(&mut self) -> Result<Option<Inbound>> {
        let Some(head_end) = find(&self.buf, b"\r\n\r\n").map(|pos| pos + 4) else {
            if self.buf.len() > MAX_REQUEST_SIZE {
                return Err(ParseErrorKind::InvalidContentLength.into());
            }
            return Ok(None);
        };

        let body_len = match content_length(&self.buf[..head_end]) {
            Ok(len) => len,
            Err(kind) => {
                self.buf.drain(..head_end);
                return Ok(Some(Inbound::Malformed(kind)));
            }
        };
        if head_end + body_len > MAX_REQUEST_SIZE {
            return Err(ParseErrorKind::InvalidContentLength.into());
        }
        if self.buf.len() < head_end + body_len {
            return Ok(None);
        }

        let raw: Vec<u8> = self.buf.drain(..head_end + body_len).collect();
        Ok(Some(match String::from_utf8(raw) {
            Ok(text) => Inbound::Request(text),
            Err(_) => Inbound::Malformed(ParseErrorKind::InvalidEncoding),
        }))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// `Content-Length` of a request head, 0 when absent.
fn content_length(head: &[u8]) -> std::result::Result<usize, ParseErrorKind> {
    let head = std::str::from_utf8(head).map_err(|_| ParseErrorKind::InvalidEncoding)?;
    for line in head.lines().skip(1) {
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("Content-Length")
        {
            return value
                .trim()
                .parse()
                .map_err(|_| ParseErrorKind::InvalidContentLength);
        }
    }
    Ok(0)
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    socket: Arc<SecureSocket>,
    rtsp: RtspSession,
    reader: RequestReader,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: TLS handshake if configured, then the request loop.
    fn handle(stream: TcpStream, peer_addr: SocketAddr, ctx: Arc<ServerContext>) {
        let socket = match SecureSocket::accept(
            stream,
            ctx.tls.as_ref(),
            ctx.config.read_poll_interval,
            ctx.config.write_timeout,
        ) {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                tracing::warn!(%peer_addr, error = %e, "connection setup failed");
                return;
            }
        };

        let rtsp = RtspSession::new(ctx.clone(), socket.clone());
        tracing::info!(
            %peer_addr,
            tls = socket.is_tls(),
            client_cert = socket.is_client_cert_authenticated(),
            session_id = %rtsp.session().id,
            "client connected"
        );

        let mut conn = Connection {
            socket,
            rtsp,
            reader: RequestReader::default(),
            peer_addr,
        };

        let reason = conn.run(&ctx);
        conn.cleanup(&ctx);

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, ctx: &ServerContext) -> &'static str {
        let mut buf = [0u8; 4096];
        let mut last_activity = Instant::now();

        while ctx.running.load(Ordering::SeqCst) {
            match self.socket.recv(&mut buf) {
                Ok(0) => return "connection closed by client",
                Ok(n) => {
                    last_activity = Instant::now();
                    self.reader.extend(&buf[..n]);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    if last_activity.elapsed() >= ctx.config.session_timeout {
                        return "session timed out";
                    }
                    continue;
                }
                Err(e) => {
                    tracing::debug!(peer = %self.peer_addr, error = %e, "read failed");
                    return "read error";
                }
            }

            loop {
                let inbound = match self.reader.next_inbound() {
                    Ok(Some(inbound)) => inbound,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(peer = %self.peer_addr, error = %e, "request too large");
                        return "request too large";
                    }
                };
                if let Err(e) = self.respond(inbound) {
                    tracing::debug!(peer = %self.peer_addr, error = %e, "write failed");
                    return "write error";
                }
            }
        }

        "server shutting down"
    }

    fn respond(&mut self, inbound: Inbound) -> io::Result<()> {
        let parsed = match inbound {
            Inbound::Request(text) => RtspRequest::parse(&text),
            Inbound::Malformed(kind) => Err(kind.into()),
        };

        let response = match parsed {
            Ok(request) => {
                tracing::debug!(
                    peer = %self.peer_addr,
                    method = %request.method,
                    uri = %request.uri,
                    cseq = request.cseq().unwrap_or("-"),
                    "request"
                );
                self.rtsp.handle(&request)
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                self.rtsp.reject_malformed()
            }
        };

        tracing::debug!(
            peer = %self.peer_addr,
            status = response.status_code,
            "response"
        );
        self.socket.send(response.serialize().as_bytes())
    }

    /// Tear down the session owned by this connection.
    fn cleanup(&mut self, ctx: &ServerContext) {
        self.rtsp.release();
        let id = self.rtsp.session().id.clone();
        ctx.mounts.remove_client_everywhere(&id);
        ctx.sessions.remove_session(&id);
        self.socket.shutdown();
    }
}
