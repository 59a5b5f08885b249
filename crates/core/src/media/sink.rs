use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use parking_lot::Mutex;

use super::h264::H264Packetizer;
use super::rtp::hns_to_rtp_timestamp;
use super::{PacketizationMode, Packetizer};
use crate::error::{Result, RtspError};
use crate::transport::context::{PacketHandler, TransportContext};

/// Dynamic payload type used for H.264.
pub const H264_PAYLOAD_TYPE: u8 = 96;

struct ClientEntry {
    context: TransportContext,
    active: bool,
}

struct Inner {
    codec: Box<dyn Packetizer>,
    clients: HashMap<String, ClientEntry>,
}

/// One stream's codec state plus the table of clients receiving it.
///
/// Request threads add, activate and remove clients while the media thread
/// calls [`packetize_and_send`](Self::packetize_and_send). A single mutex
/// covers both the codec and the table for the whole pass, so a client
/// removed at TEARDOWN never sees a later frame and every client of one
/// frame sees the same sequence numbers.
pub struct RtpPacketizer {
    inner: Mutex<Inner>,
}

impl RtpPacketizer {
    pub fn new(codec: Box<dyn Packetizer>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                codec,
                clients: HashMap::new(),
            }),
        }
    }

    /// H.264 stream with a random initial sequence number (RFC 3550 §5.1).
    pub fn h264(mode: PacketizationMode) -> Self {
        let codec = H264Packetizer::new(H264_PAYLOAD_TYPE, mode)
            .with_initial_sequence(rand::random::<u16>());
        Self::new(Box::new(codec))
    }

    /// H.264 stream with an explicit MTU.
    pub fn h264_with_mtu(mode: PacketizationMode, mtu: usize) -> Result<Self> {
        let codec = H264Packetizer::with_mtu(H264_PAYLOAD_TYPE, mode, mtu)?
            .with_initial_sequence(rand::random::<u16>());
        Ok(Self::new(Box::new(codec)))
    }

    /// Register a UDP client, inactive until [`set_active`](Self::set_active).
    ///
    /// Binds a server port pair searched upward from `local_rtp_port` and
    /// returns it as `(rtp, rtcp)`. An existing entry under `key` is replaced.
    pub fn add_network_client(
        &self,
        key: &str,
        remote: SocketAddr,
        ssrc: u32,
        local_rtp_port: u16,
    ) -> Result<(u16, u16)> {
        let local_ip = match remote.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let context = TransportContext::bind_udp(local_ip, local_rtp_port, remote, ssrc)?;
        let ports = context
            .local_ports()
            .ok_or_else(|| RtspError::InvalidConfig("UDP context without local ports".into()))?;

        tracing::debug!(
            key,
            %remote,
            ssrc = format_args!("{ssrc:08X}"),
            rtp_port = ports.0,
            "network client added"
        );
        self.insert(key, context);
        Ok(ports)
    }

    /// Register a client served through a packet handler, inactive.
    pub fn add_transport_handler(&self, key: &str, handler: PacketHandler, ssrc: u32) {
        tracing::debug!(key, ssrc = format_args!("{ssrc:08X}"), "transport handler added");
        self.insert(key, TransportContext::with_handler(handler, ssrc));
    }

    fn insert(&self, key: &str, context: TransportContext) {
        let mut inner = self.inner.lock();
        inner.clients.insert(
            key.to_string(),
            ClientEntry {
                context,
                active: false,
            },
        );
    }

    /// Start or stop delivery to a client. Returns `false` for unknown keys.
    pub fn set_active(&self, key: &str, active: bool) -> bool {
        let mut inner = self.inner.lock();
        match inner.clients.get_mut(key) {
            Some(entry) => {
                entry.active = active;
                true
            }
            None => false,
        }
    }

    /// Drop a client and its sockets. Returns `true` if it existed.
    pub fn remove_client(&self, key: &str) -> bool {
        let removed = self.inner.lock().clients.remove(key);
        if let Some(entry) = &removed {
            tracing::debug!(
                key,
                remote = ?entry.context.remote_addr(),
                sent = entry.context.sequence_number(),
                "client removed"
            );
        }
        removed.is_some()
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().clients.values().filter(|c| c.active).count()
    }

    /// Packetize one access unit and send every packet to every active client.
    ///
    /// `timestamp_hns` is the presentation time in 100 ns units. Returns the
    /// number of RTP packets produced. With no active client the frame is
    /// only inspected for SPS/PPS and `Ok(0)` is returned. Malformed frames
    /// fail the same way whether or not anyone is watching.
    ///
    /// A failing client is logged and skipped for the rest of the frame;
    /// the others still receive it.
    pub fn packetize_and_send(&self, frame: &[u8], timestamp_hns: i64) -> Result<usize> {
        let mut inner = self.inner.lock();
        let Inner { codec, clients } = &mut *inner;

        if !clients.values().any(|c| c.active) {
            codec.capture_parameter_sets(frame)?;
            return Ok(0);
        }

        let timestamp = hns_to_rtp_timestamp(timestamp_hns);
        let packets = codec.packetize(frame, timestamp)?;

        let mut failed: Vec<String> = Vec::new();
        for mut packet in packets.iter().cloned() {
            for (key, entry) in clients.iter_mut() {
                if !entry.active || failed.contains(key) {
                    continue;
                }
                if let Err(e) = entry.context.send(&mut packet) {
                    tracing::warn!(
                        key = %key,
                        remote = ?entry.context.remote_addr(),
                        error = %e,
                        "RTP send failed"
                    );
                    failed.push(key.clone());
                }
            }
        }

        Ok(packets.len())
    }

    /// Replace SPS/PPS with those in an encoder sequence header.
    pub fn set_sequence_header(&self, header: &[u8]) -> Result<()> {
        self.inner.lock().codec.set_sequence_header(header)
    }

    /// Codec `a=` lines for the SDP media section.
    pub fn sdp_attributes(&self) -> Vec<String> {
        self.inner.lock().codec.sdp_attributes()
    }

    pub fn payload_type(&self) -> u8 {
        self.inner.lock().codec.payload_type()
    }

    /// `(next sequence number, last RTP timestamp)` for `RTP-Info`.
    pub fn rtp_info(&self) -> (u16, u32) {
        let inner = self.inner.lock();
        (inner.codec.next_sequence(), inner.codec.last_rtp_timestamp())
    }
}
