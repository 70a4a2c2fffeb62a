//! C2: tagged packet variants plus parse/encode logic.
//!
//! Grounded on `proto.rs` in the teacher crate: the same `nom` + `nom_locate`
//! combinator style (`header`, `device_name`, `mac_addr`, `ip_addr`,
//! `negotiation_header`), generalized from the teacher's six packet kinds to
//! the full family spec.md §4.2/§6 names, with strict minimum-length
//! validation per variant and byte-exact big-endian field layout.

use std::convert::TryInto;
use std::io::Write;

use anyhow::anyhow;
use byteorder::{BigEndian, WriteBytesExt};
use nom::{
    bytes::complete::{tag, take},
    number::complete::{be_u16, be_u24, be_u32, be_u8},
    IResult,
};
use nom_locate::LocatedSpan;
use pretty_hex::pretty_hex;

use crate::error::{PdjError, Result};
use crate::wire::codec::{self, PacketType, MAGIC_HEADER};

type Span<'a> = LocatedSpan<&'a [u8]>;

fn header(i: Span) -> IResult<Span, ()> {
    let (i, _) = tag(&MAGIC_HEADER[..])(i)?;
    Ok((i, ()))
}

fn device_name(i: Span) -> IResult<Span, String> {
    let (i, raw) = take(20usize)(i)?;
    let name = String::from_utf8_lossy(raw.fragment());
    Ok((i, name.trim_end_matches('\0').to_string()))
}

fn mac_addr(i: Span) -> IResult<Span, [u8; 6]> {
    let (i, raw) = take(6usize)(i)?;
    Ok((i, (*raw.fragment()).try_into().unwrap()))
}

fn ip_addr(i: Span) -> IResult<Span, [u8; 4]> {
    let (i, raw) = take(4usize)(i)?;
    Ok((i, (*raw.fragment()).try_into().unwrap()))
}

fn write_device_name(w: &mut dyn Write, name: &str) -> std::io::Result<()> {
    let mut buf = [0u8; 20];
    let bytes = name.as_bytes();
    let n = bytes.len().min(20);
    buf[..n].copy_from_slice(&bytes[..n]);
    w.write_all(&buf)
}

fn write_type_and_name(w: &mut dyn Write, ty: PacketType, name: &str) -> std::io::Result<()> {
    w.write_all(&MAGIC_HEADER)?;
    w.write_u8(ty as u8)?;
    write_device_name(w, name)
}

/// Keep-alive, 54 bytes (spec.md §3/§6): device presence broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct KeepAlivePacket {
    pub name: String,
    pub device_num: u8,
    pub mac_addr: [u8; 6],
    pub ip_addr: [u8; 4],
    pub peer_count: u8,
    pub device_type: u8,
}

pub const KEEP_ALIVE_LEN: usize = 54;

impl KeepAlivePacket {
    pub const DEVICE_TYPE_OPUS_QUAD: u8 = 0x05;
    pub const DEVICE_TYPE_XDJ_AZ: u8 = 0x06;

    pub fn write(&self) -> Vec<u8> {
        let mut w = Vec::with_capacity(KEEP_ALIVE_LEN);
        write_type_and_name(&mut w, PacketType::DeviceKeepAlive, &self.name).unwrap();
        w.write_u8(0x01).unwrap();
        w.write_u8(self.device_num).unwrap();
        w.write_all(&[0u8; 1]).unwrap();
        w.write_all(&self.mac_addr).unwrap();
        w.write_all(&self.ip_addr).unwrap();
        w.write_u8(self.peer_count).unwrap();
        w.write_u8(self.device_type).unwrap();
        w.write_all(&[0x00, 0x00, 0x01]).unwrap();
        w.write_u8(0x00).unwrap();
        while w.len() < KEEP_ALIVE_LEN {
            w.push(0);
        }
        w
    }

    fn parse(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::DeviceKeepAlive as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, _) = be_u8(i)?; // sub-type, always 0x01
        let (i, device_num) = be_u8(i)?;
        let (i, _) = be_u8(i)?; // padding
        let (i, mac_addr) = mac_addr(i)?;
        let (i, ip_addr) = ip_addr(i)?;
        let (i, peer_count) = be_u8(i)?;
        let (i, device_type) = be_u8(i)?;
        Ok((
            i,
            Packet::KeepAlive(KeepAlivePacket {
                name,
                device_num,
                mac_addr,
                ip_addr,
                peer_count,
                device_type,
            }),
        ))
    }
}

/// `DEVICE_HELLO` — the initial broadcast of a joining device. Content
/// beyond the name/device-number carried in the shared header is not
/// meaningful to this crate (spec.md §4.3: "DEVICE_HELLO -> ignore").
#[derive(Debug, Clone, PartialEq)]
pub struct HelloPacket {
    pub name: String,
}

impl HelloPacket {
    pub fn write(&self) -> Vec<u8> {
        let mut w = Vec::new();
        write_type_and_name(&mut w, PacketType::DeviceHello, &self.name).unwrap();
        w.write_u8(0x01).unwrap();
        w
    }

    fn parse(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::DeviceHello as u8])(i)?;
        let (i, name) = device_name(i)?;
        Ok((i, Packet::Hello(HelloPacket { name })))
    }
}

macro_rules! number_claim_packet {
    ($name:ident, $ty:expr) => {
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            pub name: String,
            pub device_num: u8,
            pub mac_addr: [u8; 6],
        }

        impl $name {
            pub fn write(&self) -> Vec<u8> {
                let mut w = Vec::new();
                write_type_and_name(&mut w, $ty, &self.name).unwrap();
                w.write_u8(self.device_num).unwrap();
                w.write_all(&self.mac_addr).unwrap();
                w
            }
        }
    };
}

number_claim_packet!(NumberClaim1Packet, PacketType::DeviceNumClaim1);
number_claim_packet!(NumberClaim2Packet, PacketType::DeviceNumClaim2);
number_claim_packet!(NumberClaim3Packet, PacketType::DeviceNumClaim3);

/// CDJ status, spec.md minimum length 0xd4 (212) — firmware revisions add
/// trailing fields the spec says to tolerate rather than reject (§9 Open
/// Questions).
#[derive(Debug, Clone, PartialEq)]
pub struct CdjStatusPacket {
    pub name: String,
    pub device_num: u8,
    pub track_device: u8,
    pub track_slot: u8,
    pub track_type: u8,
    pub track_num: u16,
    pub firmware: String,
    pub flags: u8,
    pub pitch: u32,
    pub bpm: u16,
    pub beat: u32,
    pub cue_countdown: u16,
    pub bar_beat: u8,
    pub handing_master_to: u8,
}

pub const CDJ_STATUS_MIN_LEN: usize = 0xd4;

impl CdjStatusPacket {
    pub const FLAG_ON_AIR: u8 = 1 << 0;
    pub const FLAG_SYNC: u8 = 1 << 4;
    pub const FLAG_MASTER: u8 = 1 << 5;
    pub const FLAG_PLAYING: u8 = 1 << 6;

    pub fn is_playing(&self) -> bool {
        self.flags & Self::FLAG_PLAYING != 0
    }
    pub fn is_master(&self) -> bool {
        self.flags & Self::FLAG_MASTER != 0
    }
    pub fn is_synced(&self) -> bool {
        self.flags & Self::FLAG_SYNC != 0
    }
    pub fn is_on_air(&self) -> bool {
        self.flags & Self::FLAG_ON_AIR != 0
    }

    /// Encode at the byte offsets `parse` below reads back: flags @ 106,
    /// pitch @ 109 (3-byte BE), bpm @ 115, beat @ 125, cue_countdown @ 129,
    /// bar_beat @ 131, handing_master_to @ 151 (spec.md §6).
    pub fn write(&self) -> Vec<u8> {
        let mut w = Vec::with_capacity(CDJ_STATUS_MIN_LEN);
        write_type_and_name(&mut w, PacketType::CdjStatus, &self.name).unwrap();
        w.write_u8(0x01).unwrap(); // sub-type
        w.write_u8(0x00).unwrap(); // unknown
        w.write_u8(self.device_num).unwrap();
        w.write_all(&[0u8; 3]).unwrap(); // packet length + repeated device number
        w.write_u8(self.track_device).unwrap();
        w.write_u8(self.track_slot).unwrap();
        w.write_u8(self.track_type).unwrap();
        w.write_all(&[0u8; 5]).unwrap();
        w.write_u16::<BigEndian>(self.track_num).unwrap();
        w.write_all(&[0u8; 49]).unwrap();
        let mut firmware_buf = [0u8; 4];
        let firmware_bytes = self.firmware.as_bytes();
        let n = firmware_bytes.len().min(4);
        firmware_buf[..n].copy_from_slice(&firmware_bytes[..n]);
        w.write_all(&firmware_buf).unwrap();
        w.write_all(&[0u8; 6]).unwrap();
        w.write_u8(self.flags).unwrap();
        w.write_all(&[0u8; 2]).unwrap();
        let pitch_bytes = self.pitch.to_be_bytes();
        w.write_all(&pitch_bytes[1..]).unwrap(); // 3-byte BE pitch
        w.write_all(&[0u8; 3]).unwrap();
        w.write_u16::<BigEndian>(self.bpm).unwrap();
        w.write_all(&[0u8; 8]).unwrap();
        w.write_u32::<BigEndian>(self.beat).unwrap();
        w.write_u16::<BigEndian>(self.cue_countdown).unwrap();
        w.write_u8(self.bar_beat).unwrap();
        w.write_all(&[0u8; 19]).unwrap();
        w.write_u8(self.handing_master_to).unwrap();
        while w.len() < CDJ_STATUS_MIN_LEN {
            w.push(0);
        }
        w
    }

    fn parse(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::CdjStatus as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, _) = take(2usize)(i)?; // sub-type + unknown
        let (i, device_num) = be_u8(i)?;
        let (i, _) = take(3usize)(i)?; // packet length + repeated device number
        let (i, track_device) = be_u8(i)?;
        let (i, track_slot) = be_u8(i)?;
        let (i, track_type) = be_u8(i)?;
        let (i, _) = take(5usize)(i)?;
        let (i, track_num) = be_u16(i)?;
        let (i, _) = take(49usize)(i)?;
        let (i, firmware_raw) = take(4usize)(i)?;
        let firmware = String::from_utf8_lossy(firmware_raw.fragment())
            .trim_end_matches('\0')
            .to_string();
        let (i, _) = take(6usize)(i)?;
        let (i, flags) = be_u8(i)?;
        let (i, _) = take(2usize)(i)?;
        let (i, pitch) = be_u24(i)?;
        let (i, _) = take(3usize)(i)?;
        let (i, bpm) = be_u16(i)?;
        let (i, _) = take(8usize)(i)?;
        let (i, beat) = be_u32(i)?;
        let (i, cue_countdown) = be_u16(i)?;
        let (i, bar_beat) = be_u8(i)?;
        let (i, _) = take(19usize)(i)?;
        let (i, handing_master_to) = be_u8(i)?;

        Ok((
            i,
            Packet::CdjStatus(CdjStatusPacket {
                name,
                device_num,
                track_device,
                track_slot,
                track_type,
                track_num,
                firmware,
                flags,
                pitch,
                bpm,
                beat,
                cue_countdown,
                bar_beat,
                handing_master_to,
            }),
        ))
    }
}

/// Mixer status, spec.md minimum length 0x38 (56).
#[derive(Debug, Clone, PartialEq)]
pub struct MixerStatusPacket {
    pub name: String,
    pub device_num: u8,
    pub pitch: u32,
    pub bpm: u16,
    pub bar_beat: u8,
    pub handing_master_to: u8,
}

pub const MIXER_STATUS_MIN_LEN: usize = 0x38;

impl MixerStatusPacket {
    fn parse(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::MixerStatus as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, _) = take(2usize)(i)?;
        let (i, device_num) = be_u8(i)?;
        let (i, _) = take(6usize)(i)?; // advance to pitch at offset 0x28 (40)
        let (i, pitch) = be_u32(i)?;
        let (i, _) = take(2usize)(i)?; // advance to bpm at offset 0x2e (46)
        let (i, bpm) = be_u16(i)?;
        let (i, _) = take(6usize)(i)?; // advance to handing_master_to at offset 0x36 (54)
        let (i, handing_master_to) = be_u8(i)?;
        let (i, bar_beat) = be_u8(i)?; // bar_beat immediately follows at offset 55

        Ok((
            i,
            Packet::MixerStatus(MixerStatusPacket {
                name,
                device_num,
                pitch,
                bpm,
                bar_beat,
                handing_master_to,
            }),
        ))
    }
}

/// Beat, 96 bytes (spec.md §4.1/§6): pitch at 85 (3 bytes BE), bpm at 90 (2
/// bytes BE), beat-within-bar at 92.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatPacket {
    pub name: String,
    pub device_num: u8,
    pub next_beat: u32,
    pub next_bar: u32,
    pub pitch: u32,
    pub bpm: u16,
    pub beat_within_bar: u8,
}

pub const BEAT_LEN: usize = 96;

impl BeatPacket {
    pub fn write(&self) -> Vec<u8> {
        let mut w = Vec::with_capacity(BEAT_LEN);
        write_type_and_name(&mut w, PacketType::Beat, &self.name).unwrap();
        w.write_u8(0x01).unwrap();
        w.write_u8(0x00).unwrap();
        w.write_u8(self.device_num).unwrap();
        w.write_u16::<BigEndian>(0).unwrap(); // packet length, unused on the wire
        w.write_u32::<BigEndian>(self.next_beat).unwrap();
        w.write_u32::<BigEndian>(0).unwrap(); // second_beat
        w.write_u32::<BigEndian>(self.next_bar).unwrap();
        w.write_u32::<BigEndian>(0).unwrap(); // fourth_beat
        w.write_u32::<BigEndian>(0).unwrap(); // second_bar
        w.write_u32::<BigEndian>(0).unwrap(); // eighth_beat
        while w.len() < 85 {
            w.push(0xff);
        }
        let pitch_bytes = self.pitch.to_be_bytes();
        w.write_all(&pitch_bytes[1..]).unwrap(); // 3-byte BE pitch at offset 85
        w.write_u16::<BigEndian>(0).unwrap();
        w.write_u16::<BigEndian>(self.bpm).unwrap();
        w.write_u8(self.beat_within_bar).unwrap();
        while w.len() < BEAT_LEN - 1 {
            w.push(0);
        }
        w.write_u8(self.device_num).unwrap();
        w
    }

    fn parse(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::Beat as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, _) = take(2usize)(i)?;
        let (i, device_num) = be_u8(i)?;
        let (i, _) = take(2usize)(i)?; // packet length
        let (i, next_beat) = be_u32(i)?;
        let (i, _second_beat) = be_u32(i)?;
        let (i, next_bar) = be_u32(i)?;
        let (i, _fourth_beat) = be_u32(i)?;
        let (i, _second_bar) = be_u32(i)?;
        let (i, _eighth_beat) = be_u32(i)?;
        let (i, _) = take(24usize)(i)?; // pad to offset 85
        let (i, pitch) = be_u24(i)?;
        let (i, _) = take(2usize)(i)?;
        let (i, bpm) = be_u16(i)?;
        let (i, beat_within_bar) = be_u8(i)?;

        Ok((
            i,
            Packet::Beat(BeatPacket {
                name,
                device_num,
                next_beat,
                next_bar,
                pitch,
                bpm,
                beat_within_bar,
            }),
        ))
    }
}

/// CDJ-3000+ precise position, 60 bytes (spec.md §3/§6).
#[derive(Debug, Clone, PartialEq)]
pub struct PrecisePositionPacket {
    pub name: String,
    pub device_num: u8,
    pub track_length_seconds: u32,
    pub playback_position_ms: u32,
    pub pitch: u32,
    pub bpm: u16,
}

pub const PRECISE_POSITION_LEN: usize = 60;

impl PrecisePositionPacket {
    fn parse(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::PrecisePosition as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, _) = take(2usize)(i)?;
        let (i, device_num) = be_u8(i)?;
        let (i, _) = take(0x24usize - 32)(i)?;
        let (i, track_length_seconds) = be_u32(i)?;
        let (i, playback_position_ms) = be_u32(i)?;
        let (i, pitch_pct) = be_u32(i)?;
        let (i, _) = take(0x38usize - 0x30)(i)?;
        let (i, bpm) = be_u16(i)?;

        Ok((
            i,
            Packet::PrecisePosition(PrecisePositionPacket {
                name,
                device_num,
                track_length_seconds,
                playback_position_ms,
                pitch: pitch_pct,
                bpm,
            }),
        ))
    }
}

/// Fader start, port 50001: per-channel fader-started bitmask.
#[derive(Debug, Clone, PartialEq)]
pub struct FaderStartPacket {
    pub name: String,
    pub device_num: u8,
    pub started_mask: u8,
}

impl FaderStartPacket {
    fn parse(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::FaderStart as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, _) = take(2usize)(i)?;
        let (i, device_num) = be_u8(i)?;
        let (i, started_mask) = be_u8(i)?;

        Ok((
            i,
            Packet::FaderStart(FaderStartPacket {
                name,
                device_num,
                started_mask,
            }),
        ))
    }
}

/// Channels-on-air, port 50001: per-channel on-air bitmask.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelsOnAirPacket {
    pub name: String,
    pub device_num: u8,
    pub on_air_mask: u8,
}

impl ChannelsOnAirPacket {
    fn parse(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::ChannelsOnAir as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, _) = take(2usize)(i)?;
        let (i, device_num) = be_u8(i)?;
        let (i, on_air_mask) = be_u8(i)?;

        Ok((
            i,
            Packet::ChannelsOnAir(ChannelsOnAirPacket {
                name,
                device_num,
                on_air_mask,
            }),
        ))
    }
}

/// Sync control, port 50001: a device announcing its sync-on/off state.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncControlPacket {
    pub name: String,
    pub device_num: u8,
    pub sync_on: bool,
}

impl SyncControlPacket {
    pub fn write(&self) -> Vec<u8> {
        let mut w = Vec::new();
        write_type_and_name(&mut w, PacketType::SyncControl, &self.name).unwrap();
        w.write_u8(self.device_num).unwrap();
        w.write_u8(if self.sync_on { 0x01 } else { 0x00 }).unwrap();
        w
    }

    fn parse(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::SyncControl as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, device_num) = be_u8(i)?;
        let (i, on) = be_u8(i)?;

        Ok((
            i,
            Packet::SyncControl(SyncControlPacket {
                name,
                device_num,
                sync_on: on != 0,
            }),
        ))
    }
}

/// A request to become tempo master, sent to the current master
/// (spec.md §4.7 master-handoff state machine).
#[derive(Debug, Clone, PartialEq)]
pub struct MasterHandoffRequestPacket {
    pub name: String,
    pub device_num: u8,
}

impl MasterHandoffRequestPacket {
    pub fn write(&self) -> Vec<u8> {
        let mut w = Vec::new();
        write_type_and_name(&mut w, PacketType::MasterHandoffRequest, &self.name).unwrap();
        w.write_u8(self.device_num).unwrap();
        w
    }

    fn parse(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::MasterHandoffRequest as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, device_num) = be_u8(i)?;

        Ok((
            i,
            Packet::MasterHandoffRequest(MasterHandoffRequestPacket { name, device_num }),
        ))
    }
}

/// The response to a `MasterHandoffRequestPacket`: granted or denied.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterHandoffResponsePacket {
    pub name: String,
    pub device_num: u8,
    pub granted: bool,
}

impl MasterHandoffResponsePacket {
    pub fn write(&self) -> Vec<u8> {
        let mut w = Vec::new();
        write_type_and_name(&mut w, PacketType::MasterHandoffResponse, &self.name).unwrap();
        w.write_u8(self.device_num).unwrap();
        w.write_u8(if self.granted { 0x01 } else { 0x00 }).unwrap();
        w
    }

    fn parse(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::MasterHandoffResponse as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, device_num) = be_u8(i)?;
        let (i, granted) = be_u8(i)?;

        Ok((
            i,
            Packet::MasterHandoffResponse(MasterHandoffResponsePacket {
                name,
                device_num,
                granted: granted != 0,
            }),
        ))
    }
}

/// A media presence/metadata exchange packet whose byte layout beyond the
/// shared header is not pinned down by the spec (spec.md §9 Open
/// Questions: "treat as a boundary adapter"). Carries its raw bytes
/// forward so a caller building the out-of-scope dbserver client on top
/// of this crate can still see it go by.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPacket {
    pub name: String,
    pub device_num: u8,
    pub kind: PacketType,
    pub raw: Vec<u8>,
}

impl MediaPacket {
    fn parse(i: Span, kind: PacketType) -> IResult<Span, Packet> {
        let full = *i.fragment();
        let (i, _) = header(i)?;
        let (i, _) = be_u8(i)?; // type byte, already known
        let (i, name) = device_name(i)?;
        let (i, device_num) = be_u8(i)?;
        Ok((
            i,
            Packet::Media(MediaPacket {
                name,
                device_num,
                kind,
                raw: full.to_vec(),
            }),
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Hello(HelloPacket),
    NumberClaim1(NumberClaim1Packet),
    NumberClaim2(NumberClaim2Packet),
    NumberClaim3(NumberClaim3Packet),
    KeepAlive(KeepAlivePacket),
    CdjStatus(CdjStatusPacket),
    MixerStatus(MixerStatusPacket),
    Beat(BeatPacket),
    PrecisePosition(PrecisePositionPacket),
    FaderStart(FaderStartPacket),
    ChannelsOnAir(ChannelsOnAirPacket),
    SyncControl(SyncControlPacket),
    MasterHandoffRequest(MasterHandoffRequestPacket),
    MasterHandoffResponse(MasterHandoffResponsePacket),
    Media(MediaPacket),
}

impl Packet {
    /// Decode a single datagram received on `port`. Parser failures are
    /// never fatal (spec.md §7): the caller logs and drops the datagram.
    pub fn parse(data: &[u8], port: u16) -> Result<Packet> {
        let ty = codec::validate_header(data, port)?;
        if let Some(min) = Self::min_len_for(ty) {
            if data.len() < min {
                return Err(PdjError::PacketTooShort {
                    got: data.len(),
                    need: min,
                });
            }
        }

        let span = Span::new(data);
        let result = match ty {
            PacketType::DeviceHello => HelloPacket::parse(span),
            PacketType::DeviceNumClaim1 => Self::parse_number_claim1(span),
            PacketType::DeviceNumClaim2 => Self::parse_number_claim2(span),
            PacketType::DeviceNumClaim3 => Self::parse_number_claim3(span),
            PacketType::DeviceKeepAlive => KeepAlivePacket::parse(span),
            PacketType::CdjStatus => CdjStatusPacket::parse(span),
            PacketType::MixerStatus => MixerStatusPacket::parse(span),
            PacketType::Beat => BeatPacket::parse(span),
            PacketType::PrecisePosition => PrecisePositionPacket::parse(span),
            PacketType::FaderStart => FaderStartPacket::parse(span),
            PacketType::ChannelsOnAir => ChannelsOnAirPacket::parse(span),
            PacketType::SyncControl => SyncControlPacket::parse(span),
            PacketType::MasterHandoffRequest => MasterHandoffRequestPacket::parse(span),
            PacketType::MasterHandoffResponse => MasterHandoffResponsePacket::parse(span),
            PacketType::MediaQuery => MediaPacket::parse(span, PacketType::MediaQuery),
            PacketType::MediaResponse => MediaPacket::parse(span, PacketType::MediaResponse),
            PacketType::LoadTrackAck => MediaPacket::parse(span, PacketType::LoadTrackAck),
        };

        match result {
            Ok((_rest, pkt)) => Ok(pkt),
            Err(e) => Err(PdjError::Anyhow(anyhow!(
                "error parsing {:?} packet: {}\n{}",
                ty,
                e,
                pretty_hex(&data)
            ))),
        }
    }

    fn min_len_for(ty: PacketType) -> Option<usize> {
        use PacketType::*;
        match ty {
            DeviceKeepAlive => Some(KEEP_ALIVE_LEN),
            Beat => Some(BEAT_LEN),
            MixerStatus => Some(MIXER_STATUS_MIN_LEN),
            CdjStatus => Some(CDJ_STATUS_MIN_LEN),
            PrecisePosition => Some(PRECISE_POSITION_LEN),
            _ => None,
        }
    }

    fn parse_number_claim1(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::DeviceNumClaim1 as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, device_num) = be_u8(i)?;
        let (i, mac_addr) = mac_addr(i)?;
        Ok((
            i,
            Packet::NumberClaim1(NumberClaim1Packet {
                name,
                device_num,
                mac_addr,
            }),
        ))
    }

    fn parse_number_claim2(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::DeviceNumClaim2 as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, device_num) = be_u8(i)?;
        let (i, mac_addr) = mac_addr(i)?;
        Ok((
            i,
            Packet::NumberClaim2(NumberClaim2Packet {
                name,
                device_num,
                mac_addr,
            }),
        ))
    }

    fn parse_number_claim3(i: Span) -> IResult<Span, Packet> {
        let (i, _) = header(i)?;
        let (i, _) = tag(&[PacketType::DeviceNumClaim3 as u8])(i)?;
        let (i, name) = device_name(i)?;
        let (i, device_num) = be_u8(i)?;
        let (i, mac_addr) = mac_addr(i)?;
        Ok((
            i,
            Packet::NumberClaim3(NumberClaim3Packet {
                name,
                device_num,
                mac_addr,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::codec::{PORT_ANNOUNCE, PORT_BEAT, PORT_UPDATE};

    #[test]
    fn keep_alive_round_trips() {
        let pkt = KeepAlivePacket {
            name: "CDJ-3000".to_string(),
            device_num: 2,
            mac_addr: [0xc8, 0x3d, 0xfc, 0x0b, 0xf5, 0x1f],
            ip_addr: [192, 168, 1, 243],
            peer_count: 2,
            device_type: 0x01,
        };
        let bytes = pkt.write();
        assert_eq!(bytes.len(), KEEP_ALIVE_LEN);
        let parsed = Packet::parse(&bytes, PORT_ANNOUNCE).unwrap();
        assert_eq!(parsed, Packet::KeepAlive(pkt));
    }

    #[test]
    fn keep_alive_length_boundary() {
        let pkt = KeepAlivePacket {
            name: "CDJ-3000".to_string(),
            device_num: 2,
            mac_addr: [0; 6],
            ip_addr: [192, 168, 1, 243],
            peer_count: 1,
            device_type: 0x01,
        };
        let mut bytes = pkt.write();
        assert_eq!(bytes.len(), 54);
        bytes.pop();
        assert!(matches!(
            Packet::parse(&bytes, PORT_ANNOUNCE),
            Err(PdjError::PacketTooShort { got: 53, need: 54 })
        ));
    }

    #[test]
    fn beat_round_trips_with_exact_offsets() {
        let pkt = BeatPacket {
            name: "CDJ-2000".to_string(),
            device_num: 1,
            next_beat: 100,
            next_bar: 400,
            pitch: 1_048_576,
            bpm: 12050,
            beat_within_bar: 3,
        };
        let bytes = pkt.write();
        assert_eq!(bytes.len(), BEAT_LEN);
        assert_eq!(&bytes[85..88], &[0x10, 0x00, 0x00]);
        assert_eq!(&bytes[90..92], &[0x2f, 0x12]);
        assert_eq!(bytes[92], 0x03);

        let parsed = Packet::parse(&bytes, PORT_BEAT).unwrap();
        assert_eq!(parsed, Packet::Beat(pkt));
    }

    #[test]
    fn cdj_status_round_trips() {
        let pkt = CdjStatusPacket {
            name: "Virtual CDJ".to_string(),
            device_num: 3,
            track_device: 0,
            track_slot: 0,
            track_type: 0,
            track_num: 0,
            firmware: String::new(),
            flags: CdjStatusPacket::FLAG_MASTER | CdjStatusPacket::FLAG_PLAYING,
            pitch: 1_048_576,
            bpm: 12800,
            beat: 42,
            cue_countdown: 0,
            bar_beat: 2,
            handing_master_to: 0xff,
        };
        let bytes = pkt.write();
        assert_eq!(bytes.len(), CDJ_STATUS_MIN_LEN);
        let parsed = Packet::parse(&bytes, PORT_UPDATE).unwrap();
        assert_eq!(parsed, Packet::CdjStatus(pkt));
    }

    #[test]
    fn mixer_status_decodes_exact_offsets() {
        // Hand-built packet pinning pitch @ 0x28 (40), bpm @ 0x2e (46),
        // handing_master_to @ 0x36 (54), bar_beat @ 55 (spec.md §6).
        let mut bytes = vec![0u8; MIXER_STATUS_MIN_LEN];
        bytes[0..10].copy_from_slice(&MAGIC_HEADER);
        bytes[10] = PacketType::MixerStatus as u8;
        write_device_name(&mut bytes[11..31], "DJM-900NXS2").unwrap();
        bytes[33] = 2;
        bytes[40..44].copy_from_slice(&1_048_576u32.to_be_bytes());
        bytes[46..48].copy_from_slice(&12000u16.to_be_bytes());
        bytes[54] = 1;
        bytes[55] = 3;

        let parsed = Packet::parse(&bytes, PORT_UPDATE).unwrap();
        assert_eq!(
            parsed,
            Packet::MixerStatus(MixerStatusPacket {
                name: "DJM-900NXS2".to_string(),
                device_num: 2,
                pitch: 1_048_576,
                bpm: 12000,
                bar_beat: 3,
                handing_master_to: 1,
            })
        );
    }

    #[test]
    fn sync_control_round_trips() {
        let pkt = SyncControlPacket {
            name: "Virtual CDJ".to_string(),
            device_num: 5,
            sync_on: true,
        };
        let bytes = pkt.write();
        let parsed = Packet::parse(&bytes, PORT_BEAT).unwrap();
        assert_eq!(parsed, Packet::SyncControl(pkt));
    }

    #[test]
    fn master_handoff_round_trips() {
        let req = MasterHandoffRequestPacket {
            name: "Virtual CDJ".to_string(),
            device_num: 3,
        };
        let bytes = req.write();
        assert_eq!(
            Packet::parse(&bytes, PORT_BEAT).unwrap(),
            Packet::MasterHandoffRequest(req)
        );

        let resp = MasterHandoffResponsePacket {
            name: "CDJ-2000".to_string(),
            device_num: 1,
            granted: true,
        };
        let bytes = resp.write();
        assert_eq!(
            Packet::parse(&bytes, PORT_BEAT).unwrap(),
            Packet::MasterHandoffResponse(resp)
        );
    }
}
