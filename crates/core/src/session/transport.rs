use std::net::SocketAddr;

use crate::error::{Result, RtspError};

/// Lower transport requested in the `Transport` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerTransport {
    /// `RTP/AVP` or `RTP/AVP/UDP`.
    Udp,
    /// `RTP/AVP/TCP`, interleaved on the RTSP connection.
    Tcp,
}

/// Negotiated RTP transport of a session (RFC 2326 §12.39).
///
/// Created during SETUP from the client's `Transport` header and the
/// server's bound port pair (UDP) or the interleaved channel pair (TCP).
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=54554-54555;ssrc=1A2B3C4D
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Udp {
        /// Full socket address for RTP delivery (`client_ip:client_rtp_port`).
        client_addr: SocketAddr,
        client_rtp_port: u16,
        client_rtcp_port: u16,
        server_rtp_port: u16,
        server_rtcp_port: u16,
    },
    Interleaved {
        rtp_channel: u8,
        rtcp_channel: u8,
    },
}

impl Transport {
    /// `Transport` response header value.
    pub fn header_value(&self, ssrc: u32) -> String {
        match self {
            Transport::Udp {
                client_rtp_port,
                client_rtcp_port,
                server_rtp_port,
                server_rtcp_port,
                ..
            } => format!(
                "RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port};\
                 server_port={server_rtp_port}-{server_rtcp_port};ssrc={ssrc:08X}"
            ),
            Transport::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => format!(
                "RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel};ssrc={ssrc:08X}"
            ),
        }
    }

    pub fn is_interleaved(&self) -> bool {
        matches!(self, Transport::Interleaved { .. })
    }
}

/// Parsed client-side transport request from the RTSP `Transport` header.
///
/// The header may list several comma-separated alternatives; the first
/// one naming `RTP/AVP`, `RTP/AVP/UDP` or `RTP/AVP/TCP` is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub lower: LowerTransport,
    /// Client's requested `(rtp, rtcp)` ports (UDP).
    pub client_port: Option<(u16, u16)>,
    /// Requested `(rtp, rtcp)` interleaved channels (TCP).
    pub interleaved: Option<(u8, u8)>,
    /// SSRC the client asked the server to use (hex).
    pub ssrc: Option<u32>,
    pub multicast: bool,
}

impl TransportHeader {
    /// Parse the `Transport` header value (RFC 2326 §12.39).
    ///
    /// Fails with [`RtspError::UnsupportedTransport`] when no alternative
    /// uses RTP/AVP, or when UDP is requested without `client_port`.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp::session::transport::{LowerTransport, TransportHeader};
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.lower, LowerTransport::Udp);
    /// assert_eq!(th.client_port, Some((8000, 8001)));
    ///
    /// let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
    /// assert_eq!(th.interleaved, Some((2, 3)));
    ///
    /// assert!(TransportHeader::parse("RAW/RAW/UDP;unicast").is_err());
    /// ```
    pub fn parse(header: &str) -> Result<Self> {
        for spec in header.split(',') {
            if let Some(parsed) = Self::parse_spec(spec.trim()) {
                if parsed.lower == LowerTransport::Udp
                    && !parsed.multicast
                    && parsed.client_port.is_none()
                {
                    return Err(RtspError::UnsupportedTransport(format!(
                        "{header} (missing client_port)"
                    )));
                }
                return Ok(parsed);
            }
        }
        Err(RtspError::UnsupportedTransport(header.to_string()))
    }

    fn parse_spec(spec: &str) -> Option<Self> {
        let mut params = spec.split(';').map(str::trim);
        let lower = match params.next()?.to_ascii_uppercase().as_str() {
            "RTP/AVP" | "RTP/AVP/UDP" => LowerTransport::Udp,
            "RTP/AVP/TCP" => LowerTransport::Tcp,
            _ => return None,
        };

        let mut parsed = TransportHeader {
            lower,
            client_port: None,
            interleaved: None,
            ssrc: None,
            multicast: false,
        };

        for param in params {
            let (name, value) = match param.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim())),
                None => (param, None),
            };
            match (name.to_ascii_lowercase().as_str(), value) {
                ("multicast", _) => parsed.multicast = true,
                ("client_port", Some(value)) => parsed.client_port = parse_pair(value),
                ("interleaved", Some(value)) => parsed.interleaved = parse_pair(value),
                ("ssrc", Some(value)) => parsed.ssrc = u32::from_str_radix(value, 16).ok(),
                _ => {}
            }
        }

        Some(parsed)
    }
}

/// `a-b`, or a single `a` meaning `a-(a+1)`.
fn parse_pair<T>(value: &str) -> Option<(T, T)>
where
    T: std::str::FromStr + Copy + TryFrom<u32>,
    u32: From<T>,
{
    match value.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: T = value.trim().parse().ok()?;
            let b = T::try_from(u32::from(a) + 1).ok()?;
            Some((a, b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_udp_transport() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(th.lower, LowerTransport::Udp);
        assert_eq!(th.client_port, Some((5000, 5001)));
        assert!(!th.multicast);
    }

    #[test]
    fn parse_no_client_port() {
        assert!(matches!(
            TransportHeader::parse("RTP/AVP;unicast"),
            Err(RtspError::UnsupportedTransport(_))
        ));
    }

    #[test]
    fn parse_tcp_interleaved_default_channels() {
        let th = TransportHeader::parse("RTP/AVP/TCP;unicast").unwrap();
        assert_eq!(th.lower, LowerTransport::Tcp);
        assert_eq!(th.interleaved, None);

        let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=4").unwrap();
        assert_eq!(th.interleaved, Some((4, 5)));
    }

    #[test]
    fn parse_ssrc_hex() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=6000-6001;ssrc=1A2B3C4D")
            .unwrap();
        assert_eq!(th.ssrc, Some(0x1A2B_3C4D));
    }

    #[test]
    fn multicast_flagged() {
        let th = TransportHeader::parse("RTP/AVP;multicast;port=6000-6001").unwrap();
        assert!(th.multicast);
    }

    #[test]
    fn first_supported_alternative_wins() {
        let th = TransportHeader::parse(
            "RTP/SAVP;unicast;client_port=1-2, RTP/AVP/TCP;unicast;interleaved=0-1",
        )
        .unwrap();
        assert_eq!(th.lower, LowerTransport::Tcp);
    }

    #[test]
    fn unsupported_profile() {
        assert!(TransportHeader::parse("RTP/SAVP;unicast;client_port=1-2").is_err());
    }

    #[test]
    fn response_header_values() {
        let udp = Transport::Udp {
            client_addr: "127.0.0.1:8000".parse().unwrap(),
            client_rtp_port: 8000,
            client_rtcp_port: 8001,
            server_rtp_port: 54554,
            server_rtcp_port: 54555,
        };
        assert_eq!(
            udp.header_value(0xAB),
            "RTP/AVP;unicast;client_port=8000-8001;server_port=54554-54555;ssrc=000000AB"
        );
        let tcp = Transport::Interleaved {
            rtp_channel: 0,
            rtcp_channel: 1,
        };
        assert_eq!(
            tcp.header_value(0x1234_5678),
            "RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=12345678"
        );
        assert!(tcp.is_interleaved());
    }
}
