use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::rtp::{RTP_HEADER_LEN, RtpHeader, SequenceCounter};
use super::{PacketizationMode, Packetizer};
use crate::error::{Result, RtspError};

/// Smallest MTU that still leaves room for an FU-A fragment with payload.
pub const MIN_MTU: usize = 16;
/// Largest MTU: the biggest UDP payload an IPv4 datagram can carry
/// (65535 - 20 byte IP header - 8 byte UDP header). Also keeps STAP-A length
/// prefixes and interleaved frame lengths within 16 bits.
pub const MAX_MTU: usize = 65507;

const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_FU_A: u8 = 28;

/// STAP-A NAL unit size prefix (RFC 6184 §5.7.1).
const STAP_A_LENGTH_LEN: usize = 2;

/// H.264 RTP packetizer (RFC 6184).
///
/// Converts Annex B access units into RTP packets in one of two
/// packetization modes, fixed at construction:
///
/// - **Single NAL** ([`PacketizationMode::SingleNal`], §5.6): every NAL
///   goes out as-is. The MTU defaults to [`MAX_MTU`]; a NAL
///   longer than `MTU - 12` is cut into consecutive packets carrying
///   raw continuation bytes.
///
/// - **Non-interleaved** ([`PacketizationMode::NonInterleaved`], §5.7/§5.8):
///   consecutive NALs are aggregated into STAP-A packets while they fit in
///   `MTU - 13` bytes:
///
///   ```text
///   STAP-A:  [F|NRI|Type=24] [size:u16][NAL] [size:u16][NAL] ...
///   ```
///
///   A NAL too large for an empty STAP-A is split into FU-A fragments:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]               (up to MTU - 14 bytes)
///   ```
///
/// Every packet of one access unit carries the same timestamp; the
/// sequence number advances by one per packet and the marker bit is set
/// only on the final packet.
///
/// SPS/PPS are captured from the first frame that contains them (or from a
/// sequence header handed in up front); the SDP `fmtp` line then includes
/// `sprop-parameter-sets` and `profile-level-id` (RFC 6184 §8.1).
#[derive(Debug)]
pub struct H264Packetizer {
    payload_type: u8,
    mode: PacketizationMode,
    mtu: usize,
    sequence: SequenceCounter,
    last_timestamp: u32,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264Packetizer {
    /// Create a packetizer with the mode's default MTU.
    pub fn new(payload_type: u8, mode: PacketizationMode) -> Self {
        Self {
            payload_type,
            mode,
            mtu: mode.default_mtu(),
            sequence: SequenceCounter::default(),
            last_timestamp: 0,
            sps: None,
            pps: None,
        }
    }

    /// Create a packetizer with an explicit MTU (total RTP packet size).
    pub fn with_mtu(payload_type: u8, mode: PacketizationMode, mtu: usize) -> Result<Self> {
        if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
            return Err(RtspError::InvalidConfig(format!(
                "MTU {mtu} outside {MIN_MTU}..={MAX_MTU}"
            )));
        }
        let mut packetizer = Self::new(payload_type, mode);
        packetizer.mtu = mtu;
        Ok(packetizer)
    }

    /// Start the sequence counter at a specific value (random per RFC 3550 §5.1
    /// when created by a mount).
    pub fn with_initial_sequence(mut self, sequence: u16) -> Self {
        self.sequence = SequenceCounter::starting_at(sequence);
        self
    }

    pub fn mode(&self) -> PacketizationMode {
        self.mode
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Derive profile-level-id from SPS NAL (RFC 6184 §8.1): bytes 1–3 are
    /// profile_idc, constraint flags, and level_idc.
    fn profile_level_id(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        let bytes = sps.get(1..4)?;
        Some(hex::encode(bytes))
    }

    fn sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        let pps = self.pps.as_deref()?;
        Some(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }

    /// Build one RTP packet from header fields and payload pieces.
    fn packet(&mut self, marker: bool, timestamp: u32, parts: &[&[u8]]) -> Vec<u8> {
        let header = RtpHeader {
            marker,
            payload_type: self.payload_type,
            sequence: self.sequence.advance(),
            timestamp,
            ssrc: 0,
        };
        let len = parts.iter().map(|p| p.len()).sum::<usize>();
        let mut packet = Vec::with_capacity(RTP_HEADER_LEN + len);
        packet.extend_from_slice(&header.to_bytes());
        for part in parts {
            packet.extend_from_slice(part);
        }
        packet
    }

    /// Single NAL mode: raw NALs, split at `MTU - 12` bytes.
    fn packetize_single_nal(&mut self, nal_units: &[&[u8]], timestamp: u32) -> Vec<Vec<u8>> {
        let max_payload = self.mtu - RTP_HEADER_LEN;
        let mut packets = Vec::new();

        for (i, nal) in nal_units.iter().enumerate() {
            let last_nal = i + 1 == nal_units.len();
            let mut chunks = nal.chunks(max_payload).peekable();
            while let Some(chunk) = chunks.next() {
                let marker = last_nal && chunks.peek().is_none();
                packets.push(self.packet(marker, timestamp, &[chunk]));
            }
        }

        packets
    }

    /// Non-interleaved mode: STAP-A aggregation with FU-A fallback.
    fn packetize_non_interleaved(
        &mut self,
        nal_units: &[&[u8]],
        timestamp: u32,
    ) -> Vec<Vec<u8>> {
        // Room after the RTP header and the STAP-A type byte.
        let capacity = self.mtu - RTP_HEADER_LEN - 1;
        let mut packets = Vec::new();
        let mut pending: Vec<&[u8]> = Vec::new();
        let mut used = 0usize;

        for (i, nal) in nal_units.iter().enumerate() {
            let last_nal = i + 1 == nal_units.len();
            let needed = STAP_A_LENGTH_LEN + nal.len();

            if used + needed > capacity && !pending.is_empty() {
                packets.push(self.stap_a(&pending, timestamp, false));
                pending.clear();
                used = 0;
            }

            if needed > capacity {
                packets.extend(self.fu_a(nal, timestamp, last_nal));
                continue;
            }

            pending.push(nal);
            used += needed;
        }

        if !pending.is_empty() {
            packets.push(self.stap_a(&pending, timestamp, true));
        }

        packets
    }

    /// Aggregate NALs into one STAP-A packet (RFC 6184 §5.7.1).
    fn stap_a(&mut self, nal_units: &[&[u8]], timestamp: u32, marker: bool) -> Vec<u8> {
        // F is the OR of the aggregated F bits, NRI their maximum.
        let f = nal_units.iter().fold(0u8, |acc, nal| acc | (nal[0] & 0x80));
        let nri = nal_units.iter().map(|nal| nal[0] & 0x60).max().unwrap_or(0);
        let stap_header = [f | nri | NAL_TYPE_STAP_A];

        let mut body = Vec::with_capacity(
            nal_units
                .iter()
                .map(|n| n.len() + STAP_A_LENGTH_LEN)
                .sum(),
        );
        for nal in nal_units {
            body.extend_from_slice(&(nal.len() as u16).to_be_bytes());
            body.extend_from_slice(nal);
        }

        self.packet(marker, timestamp, &[&stap_header, &body])
    }

    /// Fragment one NAL as FU-A (RFC 6184 §5.8).
    fn fu_a(&mut self, nal_unit: &[u8], timestamp: u32, last_nal: bool) -> Vec<Vec<u8>> {
        let nal_header = nal_unit[0];
        let nal_type = nal_header & 0x1f;
        let fu_indicator = (nal_header & 0xe0) | NAL_TYPE_FU_A;
        let max_fragment = self.mtu - RTP_HEADER_LEN - 2;

        let mut packets = Vec::new();
        let mut chunks = nal_unit[1..].chunks(max_fragment).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let last_fragment = chunks.peek().is_none();
            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };
            let fu_header = start_bit | end_bit | nal_type;

            let marker = last_nal && last_fragment;
            packets.push(self.packet(marker, timestamp, &[&[fu_indicator, fu_header], chunk]));
            first = false;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal_unit.len(),
            fragments = packets.len(),
            "FU-A fragmented NAL unit"
        );

        packets
    }

    /// Extract NAL units from an H.264 Annex B bitstream.
    ///
    /// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte
    /// `00 00 01`) and returns the NAL data between them, excluding
    /// the start codes themselves. Empty NALs are skipped.
    ///
    /// The start code length is tracked per NAL so boundaries between
    /// adjacent NALs are computed correctly when mixed 3-byte and 4-byte
    /// start codes appear.
    pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
        let mut i = 0usize;

        // (nal_data_start_index, start_code_length)
        let mut start_entries: Vec<(usize, usize)> = Vec::new();

        while i < data.len() {
            if data.get(i..i + 4) == Some(&[0, 0, 0, 1]) {
                start_entries.push((i + 4, 4));
                i += 4;
            } else if data.get(i..i + 3) == Some(&[0, 0, 1]) {
                start_entries.push((i + 3, 3));
                i += 3;
            } else {
                i += 1;
            }
        }

        let mut nal_units = Vec::with_capacity(start_entries.len());
        for (idx, &(start, _)) in start_entries.iter().enumerate() {
            let end = match start_entries.get(idx + 1) {
                Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
                None => data.len(),
            };

            if start < end {
                nal_units.push(&data[start..end]);
            }
        }

        nal_units
    }

    fn split_frame(encoded_data: &[u8]) -> Result<Vec<&[u8]>> {
        if encoded_data.is_empty() {
            return Err(RtspError::MalformedFrame("empty buffer"));
        }
        let nal_units = Self::extract_nal_units(encoded_data);
        if nal_units.is_empty() {
            return Err(RtspError::MalformedFrame("no Annex B start code"));
        }
        Ok(nal_units)
    }

    /// Only set when not already known (configured or captured earlier).
    fn remember_parameter_sets(&mut self, nal_units: &[&[u8]]) {
        if self.sps.is_some() && self.pps.is_some() {
            return;
        }
        for nal in nal_units {
            let nal_type = nal[0] & 0x1f;
            if nal_type == NAL_TYPE_SPS && self.sps.is_none() {
                self.sps = Some(nal.to_vec());
                tracing::debug!("H.264 SPS captured from bitstream ({} bytes)", nal.len());
            } else if nal_type == NAL_TYPE_PPS && self.pps.is_none() {
                self.pps = Some(nal.to_vec());
                tracing::debug!("H.264 PPS captured from bitstream ({} bytes)", nal.len());
            }
        }
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, encoded_data: &[u8], timestamp: u32) -> Result<Vec<Vec<u8>>> {
        let nal_units = Self::split_frame(encoded_data)?;
        self.remember_parameter_sets(&nal_units);

        let packets = match self.mode {
            PacketizationMode::SingleNal => self.packetize_single_nal(&nal_units, timestamp),
            PacketizationMode::NonInterleaved => {
                self.packetize_non_interleaved(&nal_units, timestamp)
            }
        };
        self.last_timestamp = timestamp;

        tracing::trace!(
            nal_count = nal_units.len(),
            rtp_packets = packets.len(),
            frame_bytes = encoded_data.len(),
            seq = self.sequence.peek(),
            ts = timestamp,
            "frame packetized"
        );

        Ok(packets)
    }

    fn capture_parameter_sets(&mut self, encoded_data: &[u8]) -> Result<()> {
        let nal_units = Self::split_frame(encoded_data)?;
        self.remember_parameter_sets(&nal_units);
        Ok(())
    }

    /// Replace SPS/PPS with the ones carried by an encoder sequence header.
    fn set_sequence_header(&mut self, header: &[u8]) -> Result<()> {
        let mut sps = None;
        let mut pps = None;
        for nal in Self::extract_nal_units(header) {
            match nal[0] & 0x1f {
                NAL_TYPE_SPS if sps.is_none() => sps = Some(nal.to_vec()),
                NAL_TYPE_PPS if pps.is_none() => pps = Some(nal.to_vec()),
                _ => {}
            }
        }
        match (sps, pps) {
            (Some(sps), Some(pps)) => {
                self.sps = Some(sps);
                self.pps = Some(pps);
                Ok(())
            }
            _ => Err(RtspError::MalformedFrame("sequence header lacks SPS or PPS")),
        }
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    /// 90 kHz clock rate per RFC 6184 §8.1.
    fn clock_rate(&self) -> u32 {
        90000
    }

    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// SDP attributes per RFC 6184 §8.2.1.
    ///
    /// `a=rtpmap` defines the payload type and must precede the `a=fmtp`
    /// line that references it.
    fn sdp_attributes(&self) -> Vec<String> {
        let mut fmtp = format!(
            "a=fmtp:{} packetization-mode={}",
            self.payload_type,
            self.mode.sdp_value()
        );
        if let (Some(sprop), Some(profile)) =
            (self.sprop_parameter_sets(), self.profile_level_id())
        {
            fmtp.push_str(&format!(
                "; sprop-parameter-sets={sprop}; profile-level-id={profile}"
            ));
        }

        vec![
            format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type,
                self.codec_name(),
                self.clock_rate()
            ),
            fmtp,
            "a=control:track1".to_string(),
        ]
    }

    fn next_sequence(&self) -> u16 {
        self.sequence.peek()
    }

    fn last_rtp_timestamp(&self) -> u32 {
        self.last_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annexb(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
        out
    }

    fn nal(header: u8, len: usize) -> Vec<u8> {
        let mut v = vec![header];
        v.extend((1..len).map(|i| (i % 251) as u8 | 0x01));
        v
    }

    fn markers(packets: &[Vec<u8>]) -> Vec<bool> {
        packets.iter().map(|p| p[1] & 0x80 != 0).collect()
    }

    /// Reassemble NAL units from STAP-A, FU-A and single NAL payloads.
    fn depacketize(packets: &[Vec<u8>]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut fu: Option<Vec<u8>> = None;
        for packet in packets {
            let payload = &packet[RTP_HEADER_LEN..];
            match payload[0] & 0x1f {
                NAL_TYPE_STAP_A => {
                    let mut rest = &payload[1..];
                    while rest.len() >= 2 {
                        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
                        out.push(rest[2..2 + len].to_vec());
                        rest = &rest[2 + len..];
                    }
                }
                NAL_TYPE_FU_A => {
                    let header = payload[1];
                    if header & 0x80 != 0 {
                        fu = Some(vec![(payload[0] & 0xe0) | (header & 0x1f)]);
                    }
                    let buf = fu.as_mut().expect("FU-A without start");
                    buf.extend_from_slice(&payload[2..]);
                    if header & 0x40 != 0 {
                        out.push(fu.take().unwrap());
                    }
                }
                _ => out.push(payload.to_vec()),
            }
        }
        out
    }

    // --- NAL extraction ---

    #[test]
    fn extract_single_nal_4byte_sc() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        let nals = H264Packetizer::extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x65, 0xAA, 0xBB][..]]);
    }

    #[test]
    fn extract_single_nal_3byte_sc() {
        let data = [0, 0, 1, 0x67, 0x42, 0x00];
        let nals = H264Packetizer::extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x67, 0x42, 0x00][..]]);
    }

    #[test]
    fn extract_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let nals = H264Packetizer::extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x67, 0x42][..], &[0x68, 0xCE][..]]);
    }

    #[test]
    fn extract_skips_empty_nals_and_trailing_start_code() {
        let data = [0, 0, 0, 1, 0, 0, 1, 0x65, 0x01, 0, 0, 1];
        let nals = H264Packetizer::extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x65, 0x01][..]]);
    }

    #[test]
    fn extract_no_start_code() {
        assert!(H264Packetizer::extract_nal_units(&[]).is_empty());
        assert!(H264Packetizer::extract_nal_units(&[0xFF, 0xFE]).is_empty());
    }

    // --- Mode 0 ---

    #[test]
    fn single_nal_mode_one_packet_per_small_nal() {
        let mut p = H264Packetizer::new(96, PacketizationMode::SingleNal);
        let a = nal(0x67, 10);
        let b = nal(0x65, 40);
        let packets = p.packetize(&annexb(&[&a, &b]), 9000).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0][RTP_HEADER_LEN..], &a[..]);
        assert_eq!(&packets[1][RTP_HEADER_LEN..], &b[..]);
        assert_eq!(markers(&packets), vec![false, true]);
    }

    #[test]
    fn single_nal_mode_nal_at_mtu_boundary_is_one_packet() {
        let mtu = 200;
        let mut p = H264Packetizer::with_mtu(96, PacketizationMode::SingleNal, mtu).unwrap();
        let exact = nal(0x65, mtu - RTP_HEADER_LEN);
        let packets = p.packetize(&annexb(&[&exact]), 0).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), mtu);

        let over = nal(0x65, mtu - RTP_HEADER_LEN + 1);
        let packets = p.packetize(&annexb(&[&over]), 0).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].len(), RTP_HEADER_LEN + 1);
    }

    #[test]
    fn single_nal_mode_marker_only_on_final_split_packet() {
        let mut p = H264Packetizer::with_mtu(96, PacketizationMode::SingleNal, 100).unwrap();
        let big = nal(0x65, 300);
        let packets = p.packetize(&annexb(&[&big]), 0).unwrap();
        assert_eq!(packets.len(), 4);
        assert_eq!(markers(&packets), vec![false, false, false, true]);
        let joined: Vec<u8> = packets
            .iter()
            .flat_map(|p| p[RTP_HEADER_LEN..].to_vec())
            .collect();
        assert_eq!(joined, big);
    }

    // --- Mode 1 ---

    #[test]
    fn stap_a_aggregates_small_nals() {
        let mut p = H264Packetizer::new(96, PacketizationMode::NonInterleaved);
        let sps = nal(0x67, 12);
        let pps = nal(0x68, 4);
        let idr = nal(0x65, 200);
        let packets = p.packetize(&annexb(&[&sps, &pps, &idr]), 0).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0][RTP_HEADER_LEN] & 0x1f, NAL_TYPE_STAP_A);
        assert_eq!(packets[0][RTP_HEADER_LEN] & 0x60, 0x60);
        assert_eq!(depacketize(&packets), vec![sps, pps, idr]);
        assert_eq!(markers(&packets), vec![true]);
    }

    #[test]
    fn stap_a_flushes_when_next_nal_overflows() {
        let mtu = 100;
        let mut p = H264Packetizer::with_mtu(96, PacketizationMode::NonInterleaved, mtu).unwrap();
        // capacity = 100 - 13 = 87; NALs need 42, 43, 44, 45, 46 bytes.
        let nals: Vec<Vec<u8>> = (0..5).map(|i| nal(0x41, 40 + i)).collect();
        let refs: Vec<&[u8]> = nals.iter().map(|n| n.as_slice()).collect();
        let packets = p.packetize(&annexb(&refs), 0).unwrap();
        assert_eq!(packets.len(), 4);
        assert!(packets.iter().all(|pk| pk.len() <= mtu));
        assert_eq!(markers(&packets), vec![false, false, false, true]);
        assert_eq!(depacketize(&packets), nals);
    }

    #[test]
    fn nal_exactly_filling_stap_a_is_not_fragmented() {
        let mtu = 100;
        let mut p = H264Packetizer::with_mtu(96, PacketizationMode::NonInterleaved, mtu).unwrap();
        let fits = nal(0x65, mtu - RTP_HEADER_LEN - 1 - STAP_A_LENGTH_LEN);
        let packets = p.packetize(&annexb(&[&fits]), 0).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), mtu);
        assert_eq!(packets[0][RTP_HEADER_LEN] & 0x1f, NAL_TYPE_STAP_A);
    }

    #[test]
    fn large_nal_fragmented_as_fu_a() {
        let mtu = 100;
        let mut p = H264Packetizer::with_mtu(96, PacketizationMode::NonInterleaved, mtu).unwrap();
        let sps = nal(0x67, 10);
        let big = nal(0x65, 400);
        let tail = nal(0x41, 20);
        let packets = p.packetize(&annexb(&[&sps, &big, &tail]), 0).unwrap();

        // STAP-A(sps) flushed before the FU-A run, STAP-A(tail) last.
        assert_eq!(packets[0][RTP_HEADER_LEN] & 0x1f, NAL_TYPE_STAP_A);
        let fu = &packets[1..packets.len() - 1];
        // 399 payload bytes / 86 per fragment = 5 fragments.
        assert_eq!(fu.len(), 5);
        assert!(fu.iter().all(|pk| pk[RTP_HEADER_LEN] == 0x60 | NAL_TYPE_FU_A));
        assert_eq!(fu[0][RTP_HEADER_LEN + 1], 0x80 | 0x05);
        assert_eq!(fu[1][RTP_HEADER_LEN + 1], 0x05);
        assert_eq!(fu[4][RTP_HEADER_LEN + 1], 0x40 | 0x05);
        assert!(packets.iter().all(|pk| pk.len() <= mtu));

        let mut expected_markers = vec![false; packets.len()];
        *expected_markers.last_mut().unwrap() = true;
        assert_eq!(markers(&packets), expected_markers);
        assert_eq!(depacketize(&packets), vec![sps, big, tail]);
    }

    #[test]
    fn fu_a_on_last_nal_carries_marker() {
        let mut p = H264Packetizer::with_mtu(96, PacketizationMode::NonInterleaved, 64).unwrap();
        let big = nal(0x65, 500);
        let packets = p.packetize(&annexb(&[&big]), 0).unwrap();
        let last = packets.last().unwrap();
        assert_eq!(last[RTP_HEADER_LEN + 1] & 0x40, 0x40);
        assert_eq!(markers(&packets).iter().filter(|m| **m).count(), 1);
        assert!(markers(&packets)[packets.len() - 1]);
    }

    #[test]
    fn round_trip_many_small_nals() {
        let mut p = H264Packetizer::new(96, PacketizationMode::NonInterleaved);
        let nals: Vec<Vec<u8>> = (0..60).map(|i| nal(0x41, 10 + i * 7)).collect();
        let refs: Vec<&[u8]> = nals.iter().map(|n| n.as_slice()).collect();
        let packets = p.packetize(&annexb(&refs), 0).unwrap();
        assert!(packets.len() > 1);
        assert!(packets.iter().all(|pk| pk.len() <= 1500));
        assert_eq!(depacketize(&packets), nals);
    }

    // --- Header fields ---

    #[test]
    fn sequence_and_timestamp_per_packet() {
        let mut p = H264Packetizer::with_mtu(96, PacketizationMode::SingleNal, 50)
            .unwrap()
            .with_initial_sequence(u16::MAX - 1);
        let big = nal(0x65, 150);
        let packets = p.packetize(&annexb(&[&big]), 4242).unwrap();
        let headers: Vec<RtpHeader> = packets
            .iter()
            .map(|pk| RtpHeader::parse(pk).unwrap())
            .collect();
        let seqs: Vec<u16> = headers.iter().map(|h| h.sequence).collect();
        assert_eq!(seqs, vec![u16::MAX - 1, u16::MAX, 0, 1]);
        assert!(headers.iter().all(|h| h.timestamp == 4242));
        assert!(headers.iter().all(|h| h.payload_type == 96));
        assert_eq!(p.next_sequence(), 2);
        assert_eq!(p.last_rtp_timestamp(), 4242);
    }

    #[test]
    fn malformed_frames_rejected_without_advancing_sequence() {
        let mut p = H264Packetizer::new(96, PacketizationMode::NonInterleaved);
        assert!(matches!(p.packetize(&[], 0), Err(RtspError::MalformedFrame(_))));
        assert!(matches!(
            p.packetize(&[0x65, 0x11, 0x22], 0),
            Err(RtspError::MalformedFrame(_))
        ));
        assert_eq!(p.next_sequence(), 0);
    }

    #[test]
    fn invalid_mtu_rejected() {
        assert!(H264Packetizer::with_mtu(96, PacketizationMode::SingleNal, 8).is_err());
        assert!(H264Packetizer::with_mtu(96, PacketizationMode::SingleNal, 65508).is_err());
        assert!(H264Packetizer::with_mtu(96, PacketizationMode::SingleNal, MAX_MTU).is_ok());
    }

    // --- SDP ---

    #[test]
    fn sdp_attributes_without_parameter_sets() {
        let p = H264Packetizer::new(96, PacketizationMode::SingleNal);
        let attrs = p.sdp_attributes();
        assert_eq!(attrs[0], "a=rtpmap:96 H264/90000");
        assert_eq!(attrs[1], "a=fmtp:96 packetization-mode=0");
        assert_eq!(attrs[2], "a=control:track1");
    }

    #[test]
    fn auto_capture_sps_pps_from_first_frame() {
        let mut p = H264Packetizer::new(96, PacketizationMode::NonInterleaved);
        let sps = [0x67, 0x42, 0x00, 0x1e];
        let pps = [0x68, 0xce, 0x38, 0x80];
        let frame = annexb(&[&sps, &pps, &[0x65, 0x88, 0x00]]);
        p.packetize(&frame, 3000).unwrap();
        let attrs = p.sdp_attributes();
        assert_eq!(
            attrs[1],
            "a=fmtp:96 packetization-mode=1; sprop-parameter-sets=Z0IAHg==,aM44gA==; profile-level-id=42001e"
        );
    }

    #[test]
    fn sequence_header_overrides_captured_sets() {
        let mut p = H264Packetizer::new(96, PacketizationMode::SingleNal);
        p.capture_parameter_sets(&annexb(&[&[0x67, 0x42, 0x00, 0x1e], &[0x68, 0xce]]))
            .unwrap();
        p.set_sequence_header(&annexb(&[&[0x67, 0x64, 0x00, 0x28], &[0x68, 0xee]]))
            .unwrap();
        assert!(p.sdp_attributes()[1].contains("profile-level-id=640028"));

        let err = p.set_sequence_header(&annexb(&[&[0x67, 0x4d, 0x00, 0x1f]]));
        assert!(matches!(err, Err(RtspError::MalformedFrame(_))));
        assert!(p.sdp_attributes()[1].contains("profile-level-id=640028"));
    }

    #[test]
    fn captured_parameter_sets_are_not_replaced() {
        let mut p = H264Packetizer::new(96, PacketizationMode::NonInterleaved);
        p.capture_parameter_sets(&annexb(&[&[0x67, 0x42, 0x00, 0x1e], &[0x68, 0xce]]))
            .unwrap();
        p.capture_parameter_sets(&annexb(&[&[0x67, 0x64, 0x00, 0x28], &[0x68, 0xee]]))
            .unwrap();
        assert!(p.sdp_attributes()[1].contains("profile-level-id=42001e"));
    }
}
