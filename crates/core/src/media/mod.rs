//! Media codecs and RTP packetization.
//!
//! This module provides the [`Packetizer`] trait, the H.264 implementation
//! and the [`sink::RtpPacketizer`] that fans packets out to every client of
//! a stream.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded access unit is split into one or more RTP packets.
//! Every RTP packet carries a 12-byte fixed header ([`rtp::RtpHeader`])
//! containing:
//!
//! - **Sequence number** (16-bit, wrapping), shared by all clients of a stream.
//! - **Timestamp** (32-bit), 90 kHz media clock derived from the 100 ns
//!   presentation time.
//! - **SSRC** (32-bit), stamped per client right before sending.
//! - **Marker bit**, set on the last packet of an access unit.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC |
//! |-------|--------|-----|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |

pub mod h264;
pub mod rtp;
pub mod sink;

use std::fmt;

use crate::error::Result;

/// H.264 packetization mode advertised in SDP (RFC 6184 §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketizationMode {
    /// Mode 0: one NAL per packet, oversized NALs cut at the MTU.
    SingleNal,
    /// Mode 1: STAP-A aggregation with FU-A fragmentation.
    #[default]
    NonInterleaved,
}

impl PacketizationMode {
    /// MTU used when none is configured.
    pub fn default_mtu(self) -> usize {
        match self {
            Self::SingleNal => h264::MAX_MTU,
            Self::NonInterleaved => 1500,
        }
    }

    /// Value of the `packetization-mode` fmtp parameter.
    pub fn sdp_value(self) -> u8 {
        match self {
            Self::SingleNal => 0,
            Self::NonInterleaved => 1,
        }
    }

    pub fn from_sdp_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::SingleNal),
            1 => Some(Self::NonInterleaved),
            _ => None,
        }
    }
}

impl fmt::Display for PacketizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleNal => write!(f, "single-nal"),
            Self::NonInterleaved => write!(f, "non-interleaved"),
        }
    }
}

/// Codec-specific RTP packetizer.
///
/// Each supported codec implements this trait, providing:
/// - **Packetization**: splitting encoded data into RTP-sized packets
/// - **SDP attributes**: codec parameters for the DESCRIBE response
/// - **RTP metadata**: payload type, clock rate, sequence/timestamp state
///
/// The generic RTP header is handled by [`rtp::RtpHeader`]; packetizers
/// compose it rather than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Packetize one access unit (Annex B bitstream) into RTP packets.
    ///
    /// Each returned `Vec<u8>` is a complete RTP packet: 12-byte header
    /// (RFC 3550 §5.1) followed by the codec-specific payload. The SSRC
    /// field is zero; the caller stamps it per destination.
    ///
    /// Fails with [`RtspError::MalformedFrame`](crate::RtspError::MalformedFrame)
    /// when the buffer holds no NAL units. The sequence counter is untouched
    /// in that case.
    fn packetize(&mut self, encoded_data: &[u8], timestamp: u32) -> Result<Vec<Vec<u8>>>;

    /// Record codec parameters (SPS/PPS) carried by a frame without
    /// producing packets. Already known parameters are kept.
    ///
    /// Rejects the same malformed frames as [`packetize`](Self::packetize).
    fn capture_parameter_sets(&mut self, encoded_data: &[u8]) -> Result<()>;

    /// Replace codec parameters with those in an encoder sequence header.
    fn set_sequence_header(&mut self, header: &[u8]) -> Result<()>;

    /// Codec name for the SDP `a=rtpmap` attribute (e.g. `"H264"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    ///
    /// Video codecs typically use 90000 (90 kHz) per RFC 3551 §4.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551).
    ///
    /// Dynamic types use 96–127. H.264 conventionally uses 96.
    fn payload_type(&self) -> u8;

    /// SDP media-level attribute lines for this codec.
    ///
    /// Returned strings include the `a=` prefix, e.g.:
    /// - `"a=rtpmap:96 H264/90000"`
    /// - `"a=fmtp:96 packetization-mode=1"`
    /// - `"a=control:track1"`
    fn sdp_attributes(&self) -> Vec<String>;

    /// Sequence number of the next packet (for the `RTP-Info` header in PLAY responses).
    fn next_sequence(&self) -> u16;

    /// Timestamp of the most recent access unit (for `RTP-Info`).
    fn last_rtp_timestamp(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mtu_per_mode() {
        assert_eq!(PacketizationMode::SingleNal.default_mtu(), 65507);
        assert_eq!(PacketizationMode::NonInterleaved.default_mtu(), 1500);
    }

    #[test]
    fn sdp_value_round_trip() {
        for mode in [PacketizationMode::SingleNal, PacketizationMode::NonInterleaved] {
            assert_eq!(PacketizationMode::from_sdp_value(mode.sdp_value()), Some(mode));
        }
        assert_eq!(PacketizationMode::from_sdp_value(2), None);
    }
}
