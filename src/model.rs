//! The device-facing data model: `DeviceReference`, `DeviceAnnouncement`,
//! and the `DeviceUpdate` sum type, plus the derived accessors SPEC_FULL.md
//! §3.1 adds on top of the teacher's plain status structs.
//!
//! Grounded on `prolink::Peer`/`message.rs` in the teacher crate, expanded
//! from its single flat status shape into the tagged `DeviceUpdate` variants
//! spec.md §3 names, each carrying the byte-exact fields `wire::packet`
//! already decodes.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::wire::packet::{BeatPacket, CdjStatusPacket, MixerStatusPacket, PrecisePositionPacket};

/// Identity of a device on the network: its claimed device number plus the
/// address it is broadcasting from. Two announcements with the same tuple
/// are the same device for every purpose this crate cares about, so plain
/// structural equality (rather than the teacher's object-identity interning)
/// is the idiomatic Rust stand-in: it gives reference-equality-grade
/// behavior in `HashMap`/`HashSet` keys without a separate interner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceReference {
    pub device_number: u8,
    pub address: Ipv4Addr,
}

impl DeviceReference {
    pub fn new(device_number: u8, address: Ipv4Addr) -> Self {
        DeviceReference {
            device_number,
            address,
        }
    }
}

/// An immutable snapshot of a device's presence announcement (its
/// keep-alive), as opposed to its playback status.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceAnnouncement {
    pub address: Ipv4Addr,
    pub timestamp: Instant,
    pub name: String,
    pub device_number: u8,
    pub hardware_address: [u8; 6],
    pub peer_count: u8,
    pub is_opus_quad: bool,
    pub is_xdj_az: bool,
    pub raw: Vec<u8>,
}

impl DeviceAnnouncement {
    pub fn device_reference(&self) -> DeviceReference {
        DeviceReference::new(self.device_number, self.address)
    }

    pub fn from_packet(address: Ipv4Addr, packet: &crate::wire::packet::KeepAlivePacket, raw: &[u8]) -> Self {
        use crate::wire::packet::KeepAlivePacket;
        DeviceAnnouncement {
            address,
            timestamp: Instant::now(),
            name: packet.name.clone(),
            device_number: packet.device_num,
            hardware_address: packet.mac_addr,
            peer_count: packet.peer_count,
            is_opus_quad: packet.device_type == KeepAlivePacket::DEVICE_TYPE_OPUS_QUAD,
            is_xdj_az: packet.device_type == KeepAlivePacket::DEVICE_TYPE_XDJ_AZ,
            raw: raw.to_vec(),
        }
    }
}

/// One playback/status report, tagged by the packet kind it was decoded
/// from. Each variant carries the shared envelope (address, timestamp,
/// name, device number) plus the fields specific to that packet (spec.md
/// §3). The derived booleans/numbers below live here rather than on the
/// individual packet structs — this is the "methods on the sum type, not
/// the leaf struct" re-architecture spec.md §9 calls for.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceUpdate {
    CdjStatus {
        address: Ipv4Addr,
        timestamp: Instant,
        name: String,
        device_number: u8,
        raw: Vec<u8>,
        status: CdjStatusPacket,
    },
    MixerStatus {
        address: Ipv4Addr,
        timestamp: Instant,
        name: String,
        device_number: u8,
        raw: Vec<u8>,
        status: MixerStatusPacket,
    },
    Beat {
        address: Ipv4Addr,
        timestamp: Instant,
        name: String,
        device_number: u8,
        raw: Vec<u8>,
        beat: BeatPacket,
    },
    PrecisePosition {
        address: Ipv4Addr,
        timestamp: Instant,
        name: String,
        device_number: u8,
        raw: Vec<u8>,
        position: PrecisePositionPacket,
    },
}

/// `0xff` in the handoff field means "no handoff in progress" (spec.md §3).
pub const NO_HANDOFF_TARGET: u8 = 0xff;

impl DeviceUpdate {
    pub fn address(&self) -> Ipv4Addr {
        match self {
            DeviceUpdate::CdjStatus { address, .. }
            | DeviceUpdate::MixerStatus { address, .. }
            | DeviceUpdate::Beat { address, .. }
            | DeviceUpdate::PrecisePosition { address, .. } => *address,
        }
    }

    pub fn timestamp(&self) -> Instant {
        match self {
            DeviceUpdate::CdjStatus { timestamp, .. }
            | DeviceUpdate::MixerStatus { timestamp, .. }
            | DeviceUpdate::Beat { timestamp, .. }
            | DeviceUpdate::PrecisePosition { timestamp, .. } => *timestamp,
        }
    }

    pub fn device_number(&self) -> u8 {
        match self {
            DeviceUpdate::CdjStatus { device_number, .. }
            | DeviceUpdate::MixerStatus { device_number, .. }
            | DeviceUpdate::Beat { device_number, .. }
            | DeviceUpdate::PrecisePosition { device_number, .. } => *device_number,
        }
    }

    pub fn device_reference(&self) -> DeviceReference {
        DeviceReference::new(self.device_number(), self.address())
    }

    pub fn name(&self) -> &str {
        match self {
            DeviceUpdate::CdjStatus { name, .. }
            | DeviceUpdate::MixerStatus { name, .. }
            | DeviceUpdate::Beat { name, .. }
            | DeviceUpdate::PrecisePosition { name, .. } => name,
        }
    }

    pub fn raw(&self) -> &[u8] {
        match self {
            DeviceUpdate::CdjStatus { raw, .. }
            | DeviceUpdate::MixerStatus { raw, .. }
            | DeviceUpdate::Beat { raw, .. }
            | DeviceUpdate::PrecisePosition { raw, .. } => raw,
        }
    }

    /// Raw pitch value (0..=2_097_152); absent on `PrecisePosition`'s BPM-only report.
    pub fn pitch(&self) -> Option<u32> {
        match self {
            DeviceUpdate::CdjStatus { status, .. } => Some(status.pitch),
            DeviceUpdate::MixerStatus { status, .. } => Some(status.pitch),
            DeviceUpdate::Beat { beat, .. } => Some(beat.pitch),
            DeviceUpdate::PrecisePosition { position, .. } => Some(position.pitch),
        }
    }

    /// BPM × 100, as carried on the wire.
    pub fn bpm(&self) -> Option<u16> {
        match self {
            DeviceUpdate::CdjStatus { status, .. } => Some(status.bpm),
            DeviceUpdate::MixerStatus { status, .. } => Some(status.bpm),
            DeviceUpdate::Beat { beat, .. } => Some(beat.bpm),
            DeviceUpdate::PrecisePosition { position, .. } => Some(position.bpm),
        }
    }

    /// `bpm * pitch_multiplier`, i.e. the tempo actually being played
    /// (spec.md §3: "effective tempo = bpm × pitch / 1048576 / 100").
    pub fn get_effective_tempo(&self) -> Option<f64> {
        let bpm = self.bpm()? as f64 / 100.0;
        let pitch = self.pitch()?;
        Some(bpm * crate::wire::codec::pitch_to_multiplier(pitch))
    }

    pub fn is_tempo_master(&self) -> bool {
        match self {
            DeviceUpdate::CdjStatus { status, .. } => status.is_master(),
            DeviceUpdate::MixerStatus { .. } => false,
            DeviceUpdate::Beat { .. } => false,
            DeviceUpdate::PrecisePosition { .. } => false,
        }
    }

    pub fn is_synced(&self) -> bool {
        match self {
            DeviceUpdate::CdjStatus { status, .. } => status.is_synced(),
            _ => false,
        }
    }

    pub fn is_on_air(&self) -> bool {
        match self {
            DeviceUpdate::CdjStatus { status, .. } => status.is_on_air(),
            _ => false,
        }
    }

    pub fn is_playing(&self) -> bool {
        match self {
            DeviceUpdate::CdjStatus { status, .. } => status.is_playing(),
            _ => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        match self {
            DeviceUpdate::CdjStatus { status, .. } => status.flags & (1 << 2) != 0,
            _ => false,
        }
    }

    pub fn is_looping(&self) -> bool {
        match self {
            DeviceUpdate::CdjStatus { status, .. } => status.flags & (1 << 3) != 0,
            _ => false,
        }
    }

    /// The beat-within-bar field is only musically meaningful on `CdjStatus`
    /// and `Beat` (spec.md §3: MixerStatus's copy "is not musically
    /// meaningful"); `PrecisePosition` doesn't carry it at all.
    pub fn is_beat_within_bar_meaningful(&self) -> bool {
        matches!(
            self,
            DeviceUpdate::CdjStatus { .. } | DeviceUpdate::Beat { .. }
        )
    }

    pub fn beat_within_bar(&self) -> Option<u8> {
        match self {
            DeviceUpdate::CdjStatus { status, .. } => Some(status.bar_beat),
            DeviceUpdate::Beat { beat, .. } => Some(beat.beat_within_bar),
            _ => None,
        }
    }

    /// `Some(n)` while this device has asked to yield tempo mastership to
    /// device `n` and is still waiting for `n` to claim it (spec.md §4.7
    /// `YieldingMaster`); `Beat` never carries a handoff target.
    pub fn get_device_master_is_being_yielded_to(&self) -> Option<u8> {
        let handing_to = match self {
            DeviceUpdate::CdjStatus { status, .. } => status.handing_master_to,
            DeviceUpdate::MixerStatus { status, .. } => status.handing_master_to,
            DeviceUpdate::Beat { .. } | DeviceUpdate::PrecisePosition { .. } => return None,
        };
        if handing_to == NO_HANDOFF_TARGET {
            None
        } else {
            Some(handing_to)
        }
    }
}

/// How stale a `DeviceAnnouncement`/status can get before the registry
/// treats the device as gone (spec.md §4.6).
pub const EXPIRY: Duration = Duration::from_millis(10_000);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::packet::KeepAlivePacket;

    #[test]
    fn device_reference_equality_is_structural() {
        let a = DeviceReference::new(2, Ipv4Addr::new(192, 168, 1, 10));
        let b = DeviceReference::new(2, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(a, b);
        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn announcement_classifies_opus_quad() {
        let pkt = KeepAlivePacket {
            name: "Opus Quad".to_string(),
            device_num: 9,
            mac_addr: [0; 6],
            ip_addr: [10, 0, 0, 5],
            peer_count: 1,
            device_type: KeepAlivePacket::DEVICE_TYPE_OPUS_QUAD,
        };
        let ann = DeviceAnnouncement::from_packet(Ipv4Addr::new(10, 0, 0, 5), &pkt, &[]);
        assert!(ann.is_opus_quad);
        assert!(!ann.is_xdj_az);
    }

    #[test]
    fn effective_tempo_uses_pitch_multiplier() {
        let status = CdjStatusPacket {
            name: "CDJ-2000".to_string(),
            device_num: 1,
            track_device: 1,
            track_slot: 2,
            track_type: 1,
            track_num: 5,
            firmware: "1.60".to_string(),
            flags: CdjStatusPacket::FLAG_PLAYING,
            pitch: 1_048_576,
            bpm: 12800,
            beat: 10,
            cue_countdown: 0,
            bar_beat: 1,
            handing_master_to: NO_HANDOFF_TARGET,
        };
        let update = DeviceUpdate::CdjStatus {
            address: Ipv4Addr::new(192, 168, 1, 5),
            timestamp: Instant::now(),
            name: "CDJ-2000".to_string(),
            device_number: 1,
            raw: vec![],
            status,
        };
        assert!((update.get_effective_tempo().unwrap() - 128.0).abs() < 1e-9);
        assert!(update.is_playing());
        assert_eq!(update.get_device_master_is_being_yielded_to(), None);
    }
}
