//! C1: numeric field decoding, the magic header, and the per-port packet
//! type dispatch table.
//!
//! Grounded on `proto::header`/`proto::write_header` in the teacher crate,
//! generalized from the teacher's single `nom`-based header check into the
//! explicit `validate_header` the spec calls for, plus the numeric/pitch/
//! half-frame conversion helpers spec.md §4.1 names directly.

use crate::error::{PdjError, Result};

pub const PORT_ANNOUNCE: u16 = 50000;
pub const PORT_BEAT: u16 = 50001;
pub const PORT_UPDATE: u16 = 50002;

pub const MAGIC_HEADER: [u8; 10] = [0x51, 0x73, 0x70, 0x74, 0x31, 0x57, 0x6d, 0x4a, 0x4f, 0x4c];

/// One DJ Link packet kind, scoped to the port it is legal on.
///
/// The table is non-exhaustive by design (spec.md §4.1): firmware adds new
/// kinds over time, and callers should tolerate `UnknownPacketType` rather
/// than treat it as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    DeviceNumClaim1 = 0x00,
    DeviceNumClaim2 = 0x02,
    DeviceNumClaim3 = 0x04,
    DeviceHello = 0x0a,
    DeviceKeepAlive = 0x06,
    FaderStart = 0x02,
    ChannelsOnAir = 0x03,
    MasterHandoffRequest = 0x26,
    MasterHandoffResponse = 0x27,
    Beat = 0x28,
    SyncControl = 0x2a,
    CdjStatus = 0x0a,
    MixerStatus = 0x29,
    PrecisePosition = 0x0b,
    MediaQuery = 0x05,
    MediaResponse = 0x06,
    LoadTrackAck = 0x07,
}

/// Resolve the raw type byte for `port`, the only place a byte value is
/// ambiguous across ports (e.g. `0x02` is both `FaderStart` on 50001 and
/// `DeviceNumClaim2` on 50000).
fn packet_type_for_port(port: u16, ty: u8) -> Option<PacketType> {
    use PacketType::*;
    match (port, ty) {
        (PORT_ANNOUNCE, 0x00) => Some(DeviceNumClaim1),
        (PORT_ANNOUNCE, 0x02) => Some(DeviceNumClaim2),
        (PORT_ANNOUNCE, 0x04) => Some(DeviceNumClaim3),
        (PORT_ANNOUNCE, 0x06) => Some(DeviceKeepAlive),
        (PORT_ANNOUNCE, 0x0a) => Some(DeviceHello),
        (PORT_BEAT, 0x02) => Some(FaderStart),
        (PORT_BEAT, 0x03) => Some(ChannelsOnAir),
        (PORT_BEAT, 0x26) => Some(MasterHandoffRequest),
        (PORT_BEAT, 0x27) => Some(MasterHandoffResponse),
        (PORT_BEAT, 0x28) => Some(Beat),
        (PORT_BEAT, 0x2a) => Some(SyncControl),
        (PORT_UPDATE, 0x0a) => Some(CdjStatus),
        (PORT_UPDATE, 0x29) => Some(MixerStatus),
        (PORT_UPDATE, 0x0b) => Some(PrecisePosition),
        (PORT_UPDATE, 0x05) => Some(MediaQuery),
        (PORT_UPDATE, 0x06) => Some(MediaResponse),
        (PORT_UPDATE, 0x07) => Some(LoadTrackAck),
        _ => None,
    }
}

/// Check the magic header, the minimum length, and that `ty` is registered
/// for `port`. Returns the resolved `PacketType` or the precise error.
pub fn validate_header(packet: &[u8], port: u16) -> Result<PacketType> {
    if packet.len() < 11 {
        return Err(PdjError::PacketTooShort {
            got: packet.len(),
            need: 11,
        });
    }
    if packet[0..10] != MAGIC_HEADER {
        return Err(PdjError::PacketMagicMismatch);
    }
    let ty = packet[10];
    packet_type_for_port(port, ty).ok_or(PdjError::UnknownPacketType { port, ty })
}

/// Big-endian unsigned read of `len` bytes (1..=4) starting at `start`.
pub fn bytes_to_number(buf: &[u8], start: usize, len: usize) -> u32 {
    let mut v: u32 = 0;
    for i in 0..len {
        v = (v << 8) | unsign(buf[start + i]) as u32;
    }
    v
}

/// Little-endian unsigned read of `len` bytes (1..=4) starting at `start`.
/// Used only for BeatGrid/CueList time fields (spec.md §6).
pub fn bytes_to_number_le(buf: &[u8], start: usize, len: usize) -> u32 {
    let mut v: u32 = 0;
    for i in (0..len).rev() {
        v = (v << 8) | unsign(buf[start + i]) as u32;
    }
    v
}

/// Mask a byte to its unsigned value (a no-op in Rust, kept because the
/// spec names it as a distinct operation carried over from a signed-byte
/// source language).
pub fn unsign(b: u8) -> u8 {
    b & 0xff
}

/// Raw pitch (0..=2_097_152) to a +/-100% style percentage, where 0% is the
/// nominal 1.0x tempo (pitch == 1_048_576).
pub fn pitch_to_percentage(pitch: u32) -> f64 {
    (pitch as f64 - 1_048_576.0) / 10_485.76
}

/// Raw pitch to a tempo multiplier; `pitch_to_multiplier(1_048_576) == 1.0`.
pub fn pitch_to_multiplier(pitch: u32) -> f64 {
    pitch as f64 / 1_048_576.0
}

/// Half-frames (1/150s, the native cue/beat-grid time unit) to milliseconds.
pub fn half_frame_to_ms(hf: u32) -> u32 {
    hf * 100 / 15
}

/// Milliseconds to half-frames.
pub fn ms_to_half_frame(ms: u32) -> u32 {
    ms * 15 / 100
}

/// Prepend the magic header, packet type, and the 20-byte zero-padded
/// device name to `payload`, producing a full outbound datagram.
pub fn build_packet(ty: u8, device_name: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + 1 + 20 + payload.len());
    out.extend_from_slice(&MAGIC_HEADER);
    out.push(ty);
    let mut name_buf = [0u8; 20];
    let name_bytes = device_name.as_bytes();
    let n = name_bytes.len().min(20);
    name_buf[..n].copy_from_slice(&name_bytes[..n]);
    out.extend_from_slice(&name_buf);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_validation() {
        let mut pkt = MAGIC_HEADER.to_vec();
        pkt.push(PacketType::DeviceKeepAlive as u8);
        pkt.extend_from_slice(&[0u8; 43]); // 54 bytes total
        assert_eq!(pkt.len(), 54);
        assert_eq!(
            validate_header(&pkt, PORT_ANNOUNCE).unwrap(),
            PacketType::DeviceKeepAlive
        );
    }

    #[test]
    fn header_too_short() {
        let pkt = [0u8; 10];
        assert!(matches!(
            validate_header(&pkt, PORT_ANNOUNCE),
            Err(PdjError::PacketTooShort { got: 10, need: 11 })
        ));
    }

    #[test]
    fn header_bad_magic() {
        let mut pkt = [0u8; 20];
        pkt[10] = PacketType::DeviceKeepAlive as u8;
        assert!(matches!(
            validate_header(&pkt, PORT_ANNOUNCE),
            Err(PdjError::PacketMagicMismatch)
        ));
    }

    #[test]
    fn header_unknown_type_for_port() {
        let mut pkt = MAGIC_HEADER.to_vec();
        pkt.push(0x28); // Beat, not valid on the announcement port
        pkt.extend_from_slice(&[0u8; 10]);
        assert!(matches!(
            validate_header(&pkt, PORT_ANNOUNCE),
            Err(PdjError::UnknownPacketType {
                port: PORT_ANNOUNCE,
                ty: 0x28
            })
        ));
    }

    #[test]
    fn pitch_conversions() {
        assert_eq!(pitch_to_multiplier(1_048_576), 1.0);
        assert!((pitch_to_percentage(1_048_576)).abs() < 1e-9);
    }

    #[test]
    fn half_frame_round_trip() {
        assert_eq!(half_frame_to_ms(150), 1000);
        assert_eq!(half_frame_to_ms(0), 0);
        assert_eq!(ms_to_half_frame(1000), 150);
    }

    #[test]
    fn big_and_little_endian_reads() {
        let buf = [0x00, 0x10, 0x00, 0x00];
        assert_eq!(bytes_to_number(&buf, 0, 3), 0x001000);
        let buf_le = [0x00, 0x00, 0x10, 0x00];
        assert_eq!(bytes_to_number_le(&buf_le, 0, 4), 0x00100000);
    }
}
