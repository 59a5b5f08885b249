/// Size of the RTP fixed header without CSRCs or extensions.
pub const RTP_HEADER_LEN: usize = 12;

/// RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
///
/// The packetizer writes the header once per packet with a zero SSRC;
/// [`stamp_ssrc`] then fills in the per-destination SSRC right before
/// each send, so every client of a stream shares sequence number and
/// timestamp but can carry its own SSRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Set on the last packet of an access unit (RFC 6184 §5.1).
    pub marker: bool,
    /// RTP payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    pub sequence: u16,
    /// 90 kHz media clock for H.264.
    pub timestamp: u32,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
}

impl RtpHeader {
    /// Serialize into the 12-byte wire format.
    pub fn to_bytes(&self) -> [u8; RTP_HEADER_LEN] {
        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = 2 << 6;
        header[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7f);
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Parse the fixed header from the start of an RTP packet.
    ///
    /// Returns `None` when the buffer is too short or the version is not 2.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        let header = packet.get(..RTP_HEADER_LEN)?;
        if header[0] >> 6 != 2 {
            return None;
        }
        Some(Self {
            marker: header[1] & 0x80 != 0,
            payload_type: header[1] & 0x7f,
            sequence: u16::from_be_bytes([header[2], header[3]]),
            timestamp: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            ssrc: u32::from_be_bytes([header[8], header[9], header[10], header[11]]),
        })
    }
}

/// Overwrite the SSRC field of a serialized RTP packet.
pub fn stamp_ssrc(packet: &mut [u8], ssrc: u32) {
    if let Some(field) = packet.get_mut(8..RTP_HEADER_LEN) {
        field.copy_from_slice(&ssrc.to_be_bytes());
    }
}

/// Convert a 100 ns (HNS) presentation time to a 90 kHz RTP timestamp.
///
/// `rtp = hns * 90 / 10_000`, truncated to the 32-bit wire field.
pub fn hns_to_rtp_timestamp(timestamp_hns: i64) -> u32 {
    (i128::from(timestamp_hns) * 90 / 10_000) as u32
}

/// Wrapping 16-bit RTP sequence counter.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: u16,
}

impl SequenceCounter {
    pub fn starting_at(next: u16) -> Self {
        Self { next }
    }

    /// Sequence number the next packet will carry.
    pub fn peek(&self) -> u16 {
        self.next
    }

    /// Return the current number and advance, wrapping 65535 → 0.
    pub fn advance(&mut self) -> u16 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header(marker: bool) -> RtpHeader {
        RtpHeader {
            marker,
            payload_type: 96,
            sequence: 0x1234,
            timestamp: 0xDEADBEEF,
            ssrc: 0xAABBCCDD,
        }
    }

    #[test]
    fn version_is_2() {
        let buf = make_header(false).to_bytes();
        assert_eq!(buf[0], 0x80);
    }

    #[test]
    fn marker_bit() {
        assert_eq!(make_header(false).to_bytes()[1] & 0x80, 0);
        assert_eq!(make_header(true).to_bytes()[1] & 0x80, 0x80);
    }

    #[test]
    fn payload_type() {
        let buf = make_header(true).to_bytes();
        assert_eq!(buf[1] & 0x7f, 96);
    }

    #[test]
    fn fields_are_big_endian() {
        let buf = make_header(false).to_bytes();
        assert_eq!(&buf[2..4], &[0x12, 0x34]);
        assert_eq!(&buf[4..8], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&buf[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn parse_written_header() {
        let header = make_header(true);
        assert_eq!(RtpHeader::parse(&header.to_bytes()), Some(header));
    }

    #[test]
    fn parse_rejects_short_or_wrong_version() {
        assert!(RtpHeader::parse(&[0x80, 96, 0]).is_none());
        let mut buf = make_header(false).to_bytes();
        buf[0] = 0x40;
        assert!(RtpHeader::parse(&buf).is_none());
    }

    #[test]
    fn ssrc_stamped_per_destination() {
        let mut packet = make_header(false).to_bytes().to_vec();
        packet.extend_from_slice(&[1, 2, 3]);
        stamp_ssrc(&mut packet, 0x01020304);
        assert_eq!(&packet[8..12], &[1, 2, 3, 4]);
        assert_eq!(&packet[12..], &[1, 2, 3]);
    }

    #[test]
    fn hns_conversion() {
        // One second of HNS is one second of 90 kHz clock.
        assert_eq!(hns_to_rtp_timestamp(10_000_000), 90_000);
        assert_eq!(hns_to_rtp_timestamp(333_333), 2_999);
        assert_eq!(hns_to_rtp_timestamp(0), 0);
        // Large timestamps keep counting modulo 2^32 instead of jumping.
        let late = 200_000_000_000_000_000i64;
        let expected = (late / 10_000 * 90) as u64 % (1 << 32);
        assert_eq!(u64::from(hns_to_rtp_timestamp(late)), expected);
        assert_eq!(
            hns_to_rtp_timestamp(late + 10_000_000).wrapping_sub(hns_to_rtp_timestamp(late)),
            90_000
        );
    }

    #[test]
    fn sequence_wraps() {
        let mut seq = SequenceCounter::starting_at(u16::MAX);
        assert_eq!(seq.advance(), u16::MAX);
        assert_eq!(seq.advance(), 0);
        assert_eq!(seq.peek(), 1);
    }
}
