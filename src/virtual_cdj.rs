//! C7: the Virtual CDJ. Owns a virtual device identity, broadcasts
//! presence/status, and runs the tempo-master handoff state machine
//! (spec.md §4.7).
//!
//! Grounded on the teacher's `Prolink::join`/keep-alive loop in `lib.rs`
//! and `tasks/membership.rs`'s `handle_keep_alive`, expanded from "observe
//! only" into "observe and participate": this module is the one with no
//! direct teacher analogue for its master-election half, built in the
//! teacher's idiom (tokio task, `watch` for shutdown, `broadcast` for
//! events) from the state machine spec.md §4.7 gives verbatim.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, RwLock};

use crate::beat_sender::{BeatSender, SharedMetronome};
use crate::error::{PdjError, Result};
use crate::listener::EventBus;
use crate::metronome::{Metronome, Snapshot};
use crate::model::{DeviceReference, DeviceUpdate, NO_HANDOFF_TARGET};
use crate::wire::packet::{
    BeatPacket, CdjStatusPacket, KeepAlivePacket, MasterHandoffRequestPacket,
    MasterHandoffResponsePacket, SyncControlPacket,
};

/// How long `RequestedMaster` waits for a grant/denial before giving up
/// (spec.md §4.7 transition table).
pub const HANDOFF_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `YieldingMaster(N)` waits for `N` to actually claim master
/// before reasserting (spec.md §4.7 transition table).
pub const HANDOFF_YIELD_TIMEOUT: Duration = Duration::from_secs(10);

/// The default keep-alive cadence (spec.md §4.7: "every 1.5s").
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Follower,
    RequestedMaster,
    Master,
    YieldingMaster(u8),
}

#[derive(Debug, Clone)]
pub enum MasterEvent {
    MasterChanged(Option<u8>),
}

struct RoleFlags {
    master_state: MasterState,
    synced: bool,
    on_air: bool,
    playing: bool,
    bpm: f64,
    handoff_requested_at: Option<Instant>,
    yield_deadline: Option<Instant>,
}

/// An outbound UDP send point. `net::announce`/`net::beat` implement this
/// over their bound sockets; kept as a trait here so the Virtual CDJ
/// doesn't need to know about socket lifecycles directly. Hand-written
/// boxed-future signature (rather than `async-trait`) since the pack
/// carries no macro crate for this and a plain `Pin<Box<dyn Future>>`
/// return needs nothing extra.
pub trait OutboundSocket: Send + Sync {
    fn send_broadcast<'a>(
        &'a self,
        datagram: Vec<u8>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;
}

#[derive(Clone, Copy)]
struct Identity {
    mac_addr: [u8; 6],
    ip_addr: Ipv4Addr,
}

pub struct VirtualCdjHandle {
    pub device_number: u8,
    pub name: String,
    announce_socket: Arc<dyn OutboundSocket>,
    beat_socket: Arc<dyn OutboundSocket>,
    update_socket: Mutex<Option<Arc<dyn OutboundSocket>>>,
    roles: Mutex<RoleFlags>,
    latest_status: RwLock<HashMap<DeviceReference, DeviceUpdate>>,
    master_events: Arc<EventBus<MasterEvent>>,
    handoff_response_tx: Mutex<Option<mpsc::Sender<bool>>>,
    identity: Mutex<Option<Identity>>,
    metronome: SharedMetronome,
    beat_sender: Mutex<Option<BeatSender>>,
}

/// A cheap-to-clone handle to the shared Virtual CDJ state, matching the
/// teacher's pattern of handing `Arc<Prolink>`-style handles to tasks.
pub type VirtualCdj = Arc<VirtualCdjHandle>;

impl VirtualCdjHandle {
    pub fn new(
        device_number: u8,
        name: String,
        announce_socket: Arc<dyn OutboundSocket>,
        beat_socket: Arc<dyn OutboundSocket>,
        master_events: Arc<EventBus<MasterEvent>>,
    ) -> VirtualCdj {
        Arc::new(VirtualCdjHandle {
            device_number,
            name,
            announce_socket,
            beat_socket,
            update_socket: Mutex::new(None),
            roles: Mutex::new(RoleFlags {
                master_state: MasterState::Follower,
                synced: false,
                on_air: false,
                playing: false,
                bpm: 120.0,
                handoff_requested_at: None,
                yield_deadline: None,
            }),
            latest_status: RwLock::new(HashMap::new()),
            master_events,
            handoff_response_tx: Mutex::new(None),
            identity: Mutex::new(None),
            metronome: Arc::new(std::sync::Mutex::new(Metronome::new(120.0))),
            beat_sender: Mutex::new(None),
        })
    }

    /// Record the mac/IP address this Virtual CDJ announces under
    /// (spec.md §4.7 `start()`: "picks a device number ... binds via C4").
    pub async fn set_identity(&self, mac_addr: [u8; 6], ip_addr: Ipv4Addr) {
        *self.identity.lock().await = Some(Identity { mac_addr, ip_addr });
    }

    /// Record the update socket (C4) status packets broadcast through. Set
    /// once C4 finishes binding, which happens after this handle already
    /// exists (C4's bind needs the registry populated by C3's receive loop,
    /// which needs this handle first) — mirrors `set_identity`'s
    /// bind-after-construct pattern.
    pub async fn set_update_socket(&self, socket: Arc<dyn OutboundSocket>) {
        *self.update_socket.lock().await = Some(socket);
    }

    /// Broadcast one keep-alive using our own recorded identity
    /// (spec.md §4.7: "every 1.5s broadcasts a keep-alive").
    pub async fn send_keep_alive(&self, peer_count: u8) -> Result<()> {
        let identity = self
            .identity
            .lock()
            .await
            .ok_or(PdjError::NotRunning)?;
        let pkt = KeepAlivePacket {
            name: self.name.clone(),
            device_num: self.device_number,
            mac_addr: identity.mac_addr,
            ip_addr: identity.ip_addr.octets(),
            peer_count,
            device_type: 0x01,
        };
        self.announce_socket.send_broadcast(pkt.write()).await
    }

    /// Re-assert presence after a rival device claims our device number
    /// (spec.md §4.6 `defend`: "a defensive announcement burst"). Sent as
    /// several keep-alives in quick succession rather than a single one, so
    /// the intruder is displaced well within the handful of seconds spec.md
    /// §8 scenario 4 expects.
    pub async fn defend(&self, peer_count: u8) -> Result<()> {
        const BURST_COUNT: usize = 4;
        const BURST_SPACING: Duration = Duration::from_millis(100);

        for i in 0..BURST_COUNT {
            self.send_keep_alive(peer_count).await?;
            if i + 1 < BURST_COUNT {
                tokio::time::sleep(BURST_SPACING).await;
            }
        }
        Ok(())
    }

    /// Build and broadcast a CDJ Status packet reflecting the current role
    /// flags (spec.md §4.7 `become_master()`: "assert the master flag in
    /// outbound status packets"; §8 scenario 2 expects the next status
    /// packet to carry it). Driven from the same periodic thread as the
    /// keep-alive (spec.md §3: "C7 owns one periodic-broadcast thread
    /// (keep-alive/status)"). A no-op until C4 finishes binding and calls
    /// `set_update_socket`.
    pub async fn send_status(&self) -> Result<()> {
        let socket = match self.update_socket.lock().await.clone() {
            Some(socket) => socket,
            None => return Ok(()),
        };

        let roles = self.roles.lock().await;
        let mut flags = 0u8;
        if roles.on_air {
            flags |= CdjStatusPacket::FLAG_ON_AIR;
        }
        if roles.synced {
            flags |= CdjStatusPacket::FLAG_SYNC;
        }
        if matches!(roles.master_state, MasterState::Master) {
            flags |= CdjStatusPacket::FLAG_MASTER;
        }
        if roles.playing {
            flags |= CdjStatusPacket::FLAG_PLAYING;
        }
        let handing_master_to = match roles.master_state {
            MasterState::YieldingMaster(n) => n,
            _ => NO_HANDOFF_TARGET,
        };
        let bpm_x100 = (roles.bpm * 100.0).round() as u16;
        drop(roles);

        let snapshot = self.metronome.lock().unwrap().snapshot();
        let pkt = CdjStatusPacket {
            name: self.name.clone(),
            device_num: self.device_number,
            track_device: 0,
            track_slot: 0,
            track_type: 0,
            track_num: 0,
            firmware: String::new(),
            flags,
            pitch: snapshot.pitch,
            bpm: bpm_x100,
            beat: snapshot.beat as u32,
            cue_countdown: 0,
            bar_beat: ((snapshot.beat % 4) + 1) as u8,
            handing_master_to,
        };
        socket.send_broadcast(pkt.write()).await
    }

    pub async fn set_tempo(&self, bpm: f64) {
        self.roles.lock().await.bpm = bpm;
        self.metronome.lock().unwrap().set_tempo(bpm);
        if let Some(sender) = self.beat_sender.lock().await.as_ref() {
            sender.timeline_changed();
        }
    }

    pub async fn set_synced(&self, synced: bool) {
        self.roles.lock().await.synced = synced;
        let pkt = SyncControlPacket {
            name: self.name.clone(),
            device_num: self.device_number,
            sync_on: synced,
        };
        let _ = self.beat_socket.send_broadcast(pkt.write()).await;
    }

    pub async fn set_on_air(&self, on_air: bool) {
        self.roles.lock().await.on_air = on_air;
    }

    /// Starting to play spawns the Beat Sender; stopping tears it down
    /// (spec.md §4.7: "Beat Sender: lives only while Virtual-CDJ is both
    /// sending status and marked playing").
    pub async fn set_playing(self: &Arc<Self>, playing: bool) {
        let was_playing = {
            let mut roles = self.roles.lock().await;
            let was_playing = roles.playing;
            roles.playing = playing;
            was_playing
        };

        if playing && !was_playing {
            let sender = BeatSender::spawn(self.clone(), self.metronome.clone());
            *self.beat_sender.lock().await = Some(sender);
        } else if !playing && was_playing {
            if let Some(sender) = self.beat_sender.lock().await.take() {
                sender.shut_down();
            }
        }
    }

    pub async fn is_playing(&self) -> bool {
        self.roles.lock().await.playing
    }

    pub async fn is_master(&self) -> bool {
        matches!(self.roles.lock().await.master_state, MasterState::Master)
    }

    /// Build and broadcast a Beat packet from a metronome snapshot,
    /// returning the beat number sent (spec.md §4.7 `send_beat`).
    pub fn send_beat(self: &Arc<Self>, snapshot: &Snapshot) -> u64 {
        let this = self.clone();
        let snapshot = *snapshot;
        tokio::spawn(async move {
            let roles = this.roles.lock().await;
            let bpm_x100 = (roles.bpm * 100.0).round() as u16;
            drop(roles);

            let pkt = BeatPacket {
                name: this.name.clone(),
                device_num: this.device_number,
                next_beat: (snapshot.beat + 1) as u32,
                next_bar: (snapshot.beat + 4 - snapshot.beat % 4) as u32,
                pitch: snapshot.pitch,
                bpm: bpm_x100,
                beat_within_bar: ((snapshot.beat % 4) + 1) as u8,
            };
            let _ = this.beat_socket.send_broadcast(pkt.write()).await;
        });
        snapshot.beat
    }

    /// Record the most recently observed update for `reference` (fed by
    /// the update/beat receive loops).
    pub async fn record_update(&self, reference: DeviceReference, update: DeviceUpdate) {
        if let Some(yield_target) = self.yield_target().await {
            if reference.device_number == yield_target && update.is_tempo_master() {
                self.finish_yield().await;
            }
        }
        self.latest_status.write().await.insert(reference, update);
    }

    pub async fn get_latest_status_for(&self, reference: &DeviceReference) -> Option<DeviceUpdate> {
        self.latest_status.read().await.get(reference).cloned()
    }

    pub async fn get_tempo_master(&self) -> Option<DeviceUpdate> {
        self.latest_status
            .read()
            .await
            .values()
            .find(|u| u.is_tempo_master())
            .cloned()
    }

    async fn yield_target(&self) -> Option<u8> {
        match self.roles.lock().await.master_state {
            MasterState::YieldingMaster(n) => Some(n),
            _ => None,
        }
    }

    async fn finish_yield(&self) {
        let mut roles = self.roles.lock().await;
        roles.master_state = MasterState::Follower;
        roles.yield_deadline = None;
        drop(roles);
        self.master_events.publish(MasterEvent::MasterChanged(None));
    }

    /// Request to become tempo master (spec.md §4.7 `become_master`).
    /// `current_master` is the device number of whoever currently holds
    /// master, if any.
    pub async fn become_master(&self, current_master: Option<u8>) -> Result<()> {
        let mut roles = self.roles.lock().await;
        match current_master {
            None => {
                roles.master_state = MasterState::Master;
                drop(roles);
                self.master_events
                    .publish(MasterEvent::MasterChanged(Some(self.device_number)));
                Ok(())
            }
            Some(_current_master_device) => {
                roles.master_state = MasterState::RequestedMaster;
                roles.handoff_requested_at = Some(Instant::now());
                let (tx, mut rx) = mpsc::channel(1);
                *self.handoff_response_tx.lock().await = Some(tx);
                drop(roles);

                // The request is broadcast rather than addressed: every
                // device on the beat port receives it, but only the
                // current master (identified out of band by its asserted
                // master flag) answers with a grant/denial.
                let pkt = MasterHandoffRequestPacket {
                    name: self.name.clone(),
                    device_num: self.device_number,
                };
                self.beat_socket.send_broadcast(pkt.write()).await?;

                let granted = tokio::time::timeout(HANDOFF_REQUEST_TIMEOUT, rx.recv())
                    .await
                    .unwrap_or(None)
                    .unwrap_or(false);

                let mut roles = self.roles.lock().await;
                if granted {
                    roles.master_state = MasterState::Master;
                    drop(roles);
                    self.master_events
                        .publish(MasterEvent::MasterChanged(Some(self.device_number)));
                    Ok(())
                } else {
                    roles.master_state = MasterState::Follower;
                    roles.handoff_requested_at = None;
                    Ok(())
                }
            }
        }
    }

    /// Handle an incoming `MASTER_HANDOFF_RESPONSE` (spec.md §4.7
    /// `RequestedMaster -> Master|Follower`).
    pub async fn handle_handoff_response(&self, granted: bool) {
        if let Some(tx) = self.handoff_response_tx.lock().await.take() {
            let _ = tx.send(granted).await;
        }
    }

    /// Handle an incoming `MASTER_HANDOFF_REQUEST` from `requester`
    /// (spec.md §4.7 `Master -> YieldingMaster(N)`).
    pub async fn handle_handoff_request(&self, requester: u8) -> Result<()> {
        let mut roles = self.roles.lock().await;
        if !matches!(roles.master_state, MasterState::Master) {
            return Ok(());
        }
        roles.master_state = MasterState::YieldingMaster(requester);
        roles.yield_deadline = Some(Instant::now() + HANDOFF_YIELD_TIMEOUT);
        drop(roles);

        let pkt = MasterHandoffResponsePacket {
            name: self.name.clone(),
            device_num: self.device_number,
            granted: true,
        };
        self.beat_socket.send_broadcast(pkt.write()).await
    }

    /// Called periodically (e.g. from the keep-alive loop) to reassert
    /// master if a `YieldingMaster` grant has timed out without the
    /// grantee claiming master (spec.md §4.7 transition table, last row).
    pub async fn poll_yield_timeout(&self) {
        let mut roles = self.roles.lock().await;
        if let MasterState::YieldingMaster(_) = roles.master_state {
            if let Some(deadline) = roles.yield_deadline {
                if Instant::now() >= deadline {
                    roles.master_state = MasterState::Master;
                    roles.yield_deadline = None;
                }
            }
        }
    }

    pub async fn master_state(&self) -> MasterState {
        self.roles.lock().await.master_state
    }
}

/// Returns the error produced when an operation requires the Virtual CDJ
/// to be running and it isn't (spec.md §9 Open Questions: `PrecisePosition`
/// accessors that need a live Virtual CDJ surface this rather than a
/// silent default).
pub fn not_running() -> PdjError {
    PdjError::NotRunning
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingSocket {
        sent: Arc<AtomicUsize>,
    }

    impl OutboundSocket for RecordingSocket {
        fn send_broadcast<'a>(
            &'a self,
            _datagram: Vec<u8>,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn make_cdj() -> (VirtualCdj, Arc<AtomicUsize>) {
        let sent = Arc::new(AtomicUsize::new(0));
        let socket: Arc<dyn OutboundSocket> = Arc::new(RecordingSocket { sent: sent.clone() });
        let events = EventBus::<MasterEvent>::new(crate::listener::DeliveryStrategy::Inline);
        (
            VirtualCdjHandle::new(3, "Virtual CDJ".to_string(), socket.clone(), socket, events),
            sent,
        )
    }

    #[tokio::test]
    async fn become_master_with_no_incumbent_is_immediate() {
        let (cdj, _sent) = make_cdj();
        cdj.become_master(None).await.unwrap();
        assert!(matches!(cdj.master_state().await, MasterState::Master));
    }

    #[tokio::test]
    async fn become_master_with_incumbent_waits_for_grant() {
        let (cdj, sent) = make_cdj();
        let cdj_clone = cdj.clone();
        let task = tokio::spawn(async move { cdj_clone.become_master(Some(1)).await });

        // Let the request go out and register its response channel.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(cdj.master_state().await, MasterState::RequestedMaster));
        cdj.handle_handoff_response(true).await;

        task.await.unwrap().unwrap();
        assert!(matches!(cdj.master_state().await, MasterState::Master));
        assert!(sent.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn handoff_request_moves_master_to_yielding() {
        let (cdj, _sent) = make_cdj();
        cdj.become_master(None).await.unwrap();
        cdj.handle_handoff_request(7).await.unwrap();
        assert!(matches!(
            cdj.master_state().await,
            MasterState::YieldingMaster(7)
        ));
    }

    #[tokio::test]
    async fn yielding_master_falls_back_to_follower_when_target_claims() {
        let (cdj, _sent) = make_cdj();
        cdj.become_master(None).await.unwrap();
        cdj.handle_handoff_request(7).await.unwrap();

        let status = DeviceUpdate::CdjStatus {
            address: Ipv4Addr::new(192, 168, 1, 7),
            timestamp: Instant::now(),
            name: "CDJ-7".to_string(),
            device_number: 7,
            raw: vec![],
            status: crate::wire::packet::CdjStatusPacket {
                name: "CDJ-7".to_string(),
                device_num: 7,
                track_device: 1,
                track_slot: 1,
                track_type: 1,
                track_num: 1,
                firmware: "1.0".to_string(),
                flags: crate::wire::packet::CdjStatusPacket::FLAG_MASTER,
                pitch: 1_048_576,
                bpm: 12000,
                beat: 1,
                cue_countdown: 0,
                bar_beat: 1,
                handing_master_to: 0xff,
            },
        };
        cdj.record_update(DeviceReference::new(7, Ipv4Addr::new(192, 168, 1, 7)), status)
            .await;
        assert!(matches!(cdj.master_state().await, MasterState::Follower));
    }
}
