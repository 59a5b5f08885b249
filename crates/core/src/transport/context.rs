use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use super::udp::UdpPortPair;
use crate::error::Result;
use crate::media::rtp::{SequenceCounter, stamp_ssrc};

/// In-process packet sink used instead of UDP sockets.
///
/// TCP interleaved delivery registers a handler that frames the packet with
/// `$ <channel> <len>` and writes it to the RTSP connection; a hosting
/// application can register its own.
pub type PacketHandler = Arc<dyn Fn(&[u8]) -> io::Result<()> + Send + Sync>;

enum Delivery {
    Udp {
        sockets: UdpPortPair,
        remote: SocketAddr,
    },
    Handler(PacketHandler),
}

/// Per-client RTP delivery state.
///
/// Owned by the [`RtpPacketizer`](crate::media::sink::RtpPacketizer) client
/// table. Created at SETUP and dropped at TEARDOWN or connection loss,
/// which also releases the UDP port pair.
pub struct TransportContext {
    delivery: Delivery,
    ssrc: u32,
    /// Wrapping count of packets this context has sent.
    sent: SequenceCounter,
}

impl TransportContext {
    /// UDP delivery to `remote` (client IP + client RTP port) from a freshly
    /// bound server port pair searched upward from `base_port`.
    pub fn bind_udp(
        local_ip: IpAddr,
        base_port: u16,
        remote: SocketAddr,
        ssrc: u32,
    ) -> Result<Self> {
        let sockets = UdpPortPair::bind_from(local_ip, base_port)?;
        Ok(Self {
            delivery: Delivery::Udp { sockets, remote },
            ssrc,
            sent: SequenceCounter::default(),
        })
    }

    /// Delivery through a packet handler.
    pub fn with_handler(handler: PacketHandler, ssrc: u32) -> Self {
        Self {
            delivery: Delivery::Handler(handler),
            ssrc,
            sent: SequenceCounter::default(),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Server `(rtp, rtcp)` ports, for UDP delivery only.
    pub fn local_ports(&self) -> Option<(u16, u16)> {
        match &self.delivery {
            Delivery::Udp { sockets, .. } => sockets.ports().ok(),
            Delivery::Handler(_) => None,
        }
    }

    /// Client RTP address, for UDP delivery only.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match &self.delivery {
            Delivery::Udp { remote, .. } => Some(*remote),
            Delivery::Handler(_) => None,
        }
    }

    /// Number of packets sent so far, modulo 2^16.
    pub fn sequence_number(&self) -> u16 {
        self.sent.peek()
    }

    /// Stamp this client's SSRC into `packet` and send it.
    pub fn send(&mut self, packet: &mut [u8]) -> io::Result<()> {
        stamp_ssrc(packet, self.ssrc);
        match &self.delivery {
            Delivery::Udp { sockets, remote } => {
                sockets.send_to(packet, *remote)?;
            }
            Delivery::Handler(handler) => handler(packet)?,
        }
        self.sent.advance();
        Ok(())
    }
}

impl fmt::Debug for TransportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("TransportContext");
        match &self.delivery {
            Delivery::Udp { sockets, remote } => {
                s.field("local_ports", &sockets.ports().ok());
                s.field("remote", remote);
            }
            Delivery::Handler(_) => {
                s.field("handler", &"<fn>");
            }
        }
        s.field("ssrc", &format_args!("{:08X}", self.ssrc))
            .field("sent", &self.sent.peek())
            .finish()
    }
}
