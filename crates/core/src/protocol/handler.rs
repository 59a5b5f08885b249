use std::net::SocketAddr;
use std::sync::Arc;

use crate::auth::{AuthChallenge, AuthError};
use crate::error::{Result, RtspError};
use crate::mount::Mount;
use crate::protocol::request::{RtspCommand, RtspMethod, RtspRequest, RtspUrl};
use crate::protocol::response::{PUBLIC_METHODS, RtspResponse};
use crate::protocol::sdp::{self, SdpSession};
use crate::server::ServerContext;
use crate::session::transport::LowerTransport;
use crate::session::{Session, SessionState, SessionStatus, Transport};
use crate::transport::SecureSocket;
use crate::transport::tcp::interleaved_handler;

/// RTSP state machine for a single connection.
///
/// Each connection owns exactly one [`Session`], created on connect and
/// registered with the server's session manager. The session's transport
/// is a client entry keyed by the session ID in the resolved mount's
/// packetizer table: added inactive by SETUP, switched on by PLAY, off by
/// PAUSE, removed by TEARDOWN or [`release`](Self::release).
pub struct RtspSession {
    ctx: Arc<ServerContext>,
    socket: Arc<SecureSocket>,
    session: Arc<Session>,
    last_cseq: u32,
    /// Parts of the last absolute request URL.
    url: RtspUrl,
    /// Last challenge sent to this client.
    challenge: Option<AuthChallenge>,
    authorized: bool,
    /// Mount holding this session's client entry, set by SETUP.
    mount: Option<Arc<Mount>>,
}

impl RtspSession {
    pub(crate) fn new(ctx: Arc<ServerContext>, socket: Arc<SecureSocket>) -> Self {
        let session = ctx
            .sessions
            .create_session(socket.peer_addr(), ctx.config.session_timeout.as_secs());
        RtspSession {
            ctx,
            socket,
            session,
            last_cseq: 0,
            url: RtspUrl::default(),
            challenge: None,
            authorized: false,
            mount: None,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.get_state()
    }

    /// Answer one request. Every response echoes `CSeq` and carries
    /// `Server` and `Date`.
    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cmd = RtspCommand::from_request(request);
        let cseq = cmd.cseq.unwrap_or_else(|| self.last_cseq.wrapping_add(1));
        self.last_cseq = cseq;
        if !cmd.url.host_port.is_empty() {
            if cmd.url.host_port != self.url.host_port {
                tracing::debug!(
                    session_id = %self.session.id,
                    server = %cmd.url.base(),
                    "client addressed server"
                );
            }
            self.url = cmd.url.clone();
        }

        let mut response = self.dispatch(&cmd);
        response
            .headers
            .insert(1, ("CSeq".to_string(), cseq.to_string()));
        response.with_date()
    }

    /// Answer a request that could not be parsed.
    pub fn reject_malformed(&mut self) -> RtspResponse {
        self.last_cseq = self.last_cseq.wrapping_add(1);
        RtspResponse::bad_request()
            .add_header("CSeq", &self.last_cseq.to_string())
            .with_date()
    }

    fn dispatch(&mut self, cmd: &RtspCommand) -> RtspResponse {
        let state = self.session.get_state();
        if state == SessionState::Terminated {
            return match cmd.method {
                RtspMethod::Teardown => RtspResponse::ok(),
                _ => {
                    tracing::warn!(
                        session_id = %self.session.id,
                        method = %cmd.method,
                        "request after TEARDOWN"
                    );
                    RtspResponse::method_not_valid()
                }
            };
        }

        if let Some(id) = &cmd.session
            && id != &self.session.id
        {
            tracing::warn!(session_id = %self.session.id, requested = %id, "unknown session");
            return RtspResponse::session_not_found();
        }

        if matches!(
            cmd.method,
            RtspMethod::Describe | RtspMethod::Setup | RtspMethod::Play
        ) && let Err(e) = self.authenticate(cmd)
        {
            return self.challenge(e);
        }

        match &cmd.method {
            RtspMethod::Options => RtspResponse::ok().add_header("Public", PUBLIC_METHODS),
            RtspMethod::Describe => self.handle_describe(cmd),
            RtspMethod::Setup => self.handle_setup(cmd),
            RtspMethod::Play => self.handle_play(cmd),
            RtspMethod::Pause => self.handle_pause(),
            RtspMethod::Teardown => {
                self.release();
                RtspResponse::ok()
            }
            // Keepalive (RFC 2326 §10.8).
            RtspMethod::GetParameter => {
                tracing::trace!(session_id = %self.session.id, "GET_PARAMETER keepalive");
                let response = RtspResponse::ok();
                match cmd.session {
                    Some(_) => response.add_header("Session", &self.session.session_header_value()),
                    None => response,
                }
            }
            RtspMethod::Unknown(method) => {
                tracing::warn!(%method, "unsupported RTSP method");
                RtspResponse::not_implemented()
            }
        }
    }

    /// Pass when no auth is configured, the client already authenticated on
    /// this connection, or it presented a TLS client certificate.
    fn authenticate(&mut self, cmd: &RtspCommand) -> Result<()> {
        let Some(provider) = self.ctx.auth.clone() else {
            return Ok(());
        };
        if self.authorized {
            return Ok(());
        }
        if let Some(identity) = self.socket.client_cert_user_name() {
            tracing::info!(
                session_id = %self.session.id,
                client_cert = identity,
                "client authenticated over TLS"
            );
            self.authorized = true;
            return Ok(());
        }

        let (Some(authorization), Some(challenge)) = (&cmd.authorization, &self.challenge) else {
            return Err(RtspError::AuthChallengeRequired);
        };
        provider.authorize(authorization, challenge, cmd.method.as_str())?;

        self.authorized = true;
        tracing::info!(
            session_id = %self.session.id,
            peer = %self.session.peer,
            "client authorized"
        );
        Ok(())
    }

    /// `401` with a fresh challenge, remembered for the client's retry.
    fn challenge(&mut self, error: RtspError) -> RtspResponse {
        let stale = matches!(error, RtspError::Auth(AuthError::StaleNonce));
        if !matches!(error, RtspError::AuthChallengeRequired) {
            tracing::warn!(session_id = %self.session.id, error = %error, "authorization rejected");
        }

        let mut response = RtspResponse::unauthorized();
        if let Some(provider) = &self.ctx.auth {
            let challenge = provider.new_challenge(stale);
            for value in &challenge.values {
                response = response.add_header("WWW-Authenticate", value);
            }
            self.challenge = Some(challenge);
        }
        response
    }

    fn resolve_mount(&self, cmd: &RtspCommand) -> Option<Arc<Mount>> {
        let mount = self.ctx.mounts.resolve(&cmd.url.suffix);
        if mount.is_none() {
            tracing::warn!(method = %cmd.method, uri = %cmd.uri, "no mount for request");
        }
        mount
    }

    /// Address for the SDP `o=`/`c=` lines: configured public host, then
    /// the host the client addressed, then our side of the connection.
    fn sdp_address(&self) -> String {
        if let Some(host) = &self.ctx.config.public_host {
            return host.clone();
        }
        match self.url.host() {
            "" => self.socket.local_addr().ip().to_string(),
            host => host.to_string(),
        }
    }

    fn handle_describe(&self, cmd: &RtspCommand) -> RtspResponse {
        let Some(mount) = self.resolve_mount(cmd) else {
            return RtspResponse::not_found();
        };

        let media_port = match self.session.get_transport() {
            Some(Transport::Udp {
                server_rtp_port, ..
            }) => server_rtp_port,
            _ => self.ctx.config.rtp_base_port,
        };
        let address = self.sdp_address();
        let session_id = rand::random::<u32>().to_string();
        let sdp = sdp::generate_sdp(
            &mount,
            &SdpSession {
                address: &address,
                username: &self.ctx.config.sdp_username,
                session_id: &session_id,
                session_name: &self.ctx.config.sdp_session_name,
                media_port,
            },
        );

        RtspResponse::ok()
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &content_base(&cmd.uri))
            .with_body(sdp)
    }

    fn handle_setup(&mut self, cmd: &RtspCommand) -> RtspResponse {
        if self.session.get_state() == SessionState::Playing {
            tracing::warn!(session_id = %self.session.id, "SETUP while playing");
            return RtspResponse::method_not_valid();
        }
        let Some(mount) = self.resolve_mount(cmd) else {
            return RtspResponse::not_found();
        };

        let header = match cmd.transport() {
            Some(Ok(header)) => header,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "SETUP with unsupported Transport");
                return RtspResponse::unsupported_transport();
            }
            None => {
                tracing::warn!("SETUP missing Transport header");
                return RtspResponse::bad_request();
            }
        };
        if header.multicast {
            tracing::warn!("SETUP requested multicast");
            return RtspResponse::unsupported_transport();
        }

        let key = self.session.id.clone();
        let ssrc = header.ssrc.unwrap_or_else(rand::random);

        let transport = match header.lower {
            LowerTransport::Udp => {
                let Some((client_rtp_port, client_rtcp_port)) = header.client_port else {
                    return RtspResponse::unsupported_transport();
                };
                let client_addr = SocketAddr::new(self.socket.peer_addr().ip(), client_rtp_port);
                match mount.sink().add_network_client(
                    &key,
                    client_addr,
                    ssrc,
                    self.ctx.config.rtp_base_port,
                ) {
                    Ok((server_rtp_port, server_rtcp_port)) => Transport::Udp {
                        client_addr,
                        client_rtp_port,
                        client_rtcp_port,
                        server_rtp_port,
                        server_rtcp_port,
                    },
                    Err(e) => {
                        tracing::error!(
                            session_id = %key,
                            error = %e,
                            "failed to allocate server ports"
                        );
                        return RtspResponse::internal_error();
                    }
                }
            }
            LowerTransport::Tcp => {
                let (rtp_channel, rtcp_channel) = header.interleaved.unwrap_or((0, 1));
                let handler = interleaved_handler(self.socket.clone(), rtp_channel);
                mount.sink().add_transport_handler(&key, handler, ssrc);
                Transport::Interleaved {
                    rtp_channel,
                    rtcp_channel,
                }
            }
        };

        let transport_value = transport.header_value(ssrc);
        tracing::info!(
            session_id = %key,
            mount = %mount.path(),
            transport = %transport_value,
            "SETUP complete"
        );
        // The new entry replaced any old one on the same mount; a previous
        // mount is released only once the new transport exists.
        if let Some(previous) = self.mount.take()
            && !Arc::ptr_eq(&previous, &mount)
        {
            previous.sink().remove_client(&key);
        }
        self.session.set_transport(mount.path(), transport);
        self.session.set_state(SessionState::Ready);
        self.mount = Some(mount);
        self.ctx.sessions.notify(&self.session, SessionStatus::SetupDone);

        RtspResponse::ok()
            .add_header("Transport", &transport_value)
            .add_header("Session", &self.session.session_header_value())
    }

    fn handle_play(&mut self, cmd: &RtspCommand) -> RtspResponse {
        let state = self.session.get_state();
        let mount = match &self.mount {
            Some(mount) if matches!(state, SessionState::Ready | SessionState::Paused) => {
                mount.clone()
            }
            _ => {
                tracing::warn!(session_id = %self.session.id, %state, "PLAY not valid");
                return RtspResponse::method_not_valid();
            }
        };

        mount.sink().set_active(&self.session.id, true);
        self.session.set_state(SessionState::Playing);
        self.ctx.sessions.notify(&self.session, SessionStatus::Playing);

        let (seq, rtptime) = mount.rtp_info();
        RtspResponse::ok()
            .add_header("Range", "npt=0.000-")
            .add_header("Session", &self.session.session_header_value())
            .add_header("RTP-Info", &format!("url={};seq={seq};rtptime={rtptime}", cmd.uri))
    }

    fn handle_pause(&mut self) -> RtspResponse {
        match (self.session.get_state(), &self.mount) {
            (SessionState::Playing, Some(mount)) => {
                mount.sink().set_active(&self.session.id, false);
                self.session.set_state(SessionState::Paused);
                self.ctx.sessions.notify(&self.session, SessionStatus::Paused);
            }
            (SessionState::Paused, _) => {}
            (state, _) => {
                tracing::warn!(session_id = %self.session.id, %state, "PAUSE not valid");
                return RtspResponse::method_not_valid();
            }
        }
        RtspResponse::ok().add_header("Session", &self.session.session_header_value())
    }

    /// Remove the transport, then move to `Terminated`. Idempotent; used by
    /// TEARDOWN and on connection loss.
    pub fn release(&mut self) {
        if self.session.get_state() == SessionState::Terminated {
            return;
        }
        if let Some(mount) = self.mount.take() {
            mount.sink().remove_client(&self.session.id);
        }
        self.session.set_state(SessionState::Terminated);
        self.ctx.sessions.notify(&self.session, SessionStatus::Ended);
    }
}

/// `Content-Base` for a DESCRIBE URI, with the trailing slash that makes
/// `a=control:track1` resolve under the mount.
fn content_base(uri: &str) -> String {
    format!("{}/", uri.trim_end_matches('/'))
}
