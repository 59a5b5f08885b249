//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses. The format:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=- <sess-id> 0 IN IP4 <addr>                ← origin (IP6 for IPv6)
//! s=<session-name>                             ← session name
//! c=IN IP4 <addr>                              ← connection address
//! t=0 0                                        ← timing (live stream)
//! a=tool:rtsp-streamer                         ← server software (§6)
//! a=sendonly                                   ← direction (§6)
//! m=video 54554 RTP/AVP 96                     ← media description
//! a=rtpmap:96 H264/90000                       ← codec/clock rate
//! a=fmtp:96 packetization-mode=1; ...          ← codec parameters
//! a=control:track1                             ← track control URL
//! ```

use std::net::IpAddr;

use crate::mount::Mount;

/// Session-level SDP fields.
#[derive(Debug, Clone)]
pub struct SdpSession<'a> {
    /// Address for `o=` and `c=`.
    pub address: &'a str,
    /// `o=` username, `-` when unset.
    pub username: &'a str,
    /// `o=` session id.
    pub session_id: &'a str,
    pub session_name: &'a str,
    /// Port advertised on the `m=` line.
    pub media_port: u16,
}

/// Generate an SDP session description for the given mount.
pub fn generate_sdp(mount: &Mount, session: &SdpSession<'_>) -> String {
    let (addr_type, address) = address_fields(session.address);
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o={} {} 0 IN {addr_type} {address}",
        session.username, session.session_id
    ));
    sdp.push(format!("s={}", session.session_name));
    sdp.push(format!("c=IN {addr_type} {address}"));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:rtsp-streamer".to_string());
    sdp.push("a=sendonly".to_string());
    sdp.push(format!(
        "m=video {} RTP/AVP {}",
        session.media_port,
        mount.payload_type()
    ));
    sdp.extend(mount.sdp_attributes());

    tracing::debug!(mount = %mount.path(), "SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

/// `(addrtype, unicast-address)` for `o=`/`c=`. Host names are sent as
/// `IP4`; IPv6 literals lose their URL brackets.
fn address_fields(address: &str) -> (&'static str, &str) {
    let bare = address
        .strip_prefix('[')
        .and_then(|a| a.strip_suffix(']'))
        .unwrap_or(address);
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => ("IP6", bare),
        _ => ("IP4", address),
    }
}
