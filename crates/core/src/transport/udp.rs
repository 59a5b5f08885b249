use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};

use crate::error::{Result, RtspError};

/// Default first RTP port tried when binding a server-side port pair.
pub const RTP_DEFAULT_PORT: u16 = 54554;

/// Server-side RTP/RTCP UDP socket pair for one client (RFC 3550 §11).
///
/// RTP goes out of the even port; the odd RTCP port is held open so the
/// pair advertised in the SETUP response stays reserved for the session.
/// Incoming RTCP is not processed.
#[derive(Debug)]
pub struct UdpPortPair {
    rtp: UdpSocket,
    rtcp: UdpSocket,
}

impl UdpPortPair {
    /// Bind the first free even/odd pair at or above `base_port`.
    ///
    /// An odd base is rounded up to the next even port. Fails with
    /// [`RtspError::PortRangeExhausted`] when no pair below 65535 is free.
    pub fn bind_from(ip: IpAddr, base_port: u16) -> Result<Self> {
        let mut port = u32::from(base_port);
        if port % 2 == 1 {
            port += 1;
        }

        while port < u32::from(u16::MAX) {
            let rtp_port = port as u16;
            if let Ok(rtp) = UdpSocket::bind(SocketAddr::new(ip, rtp_port)) {
                if let Ok(rtcp) = UdpSocket::bind(SocketAddr::new(ip, rtp_port + 1)) {
                    tracing::debug!(rtp_port, rtcp_port = rtp_port + 1, "bound RTP port pair");
                    return Ok(Self { rtp, rtcp });
                }
            }
            port += 2;
        }

        Err(RtspError::PortRangeExhausted(base_port))
    }

    /// Local `(rtp, rtcp)` ports.
    pub fn ports(&self) -> Result<(u16, u16)> {
        Ok((self.rtp.local_addr()?.port(), self.rtcp.local_addr()?.port()))
    }

    /// Send one RTP packet to the client's RTP port.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.rtp.send_to(payload, addr)
    }
}
