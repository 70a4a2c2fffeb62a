//! `Pdj` — the facade tying the eight components together into the single
//! typed API surface spec.md §6 describes: a library boundary with no CLI
//! and no configuration file, joined once and drained through one `next()`
//! channel.
//!
//! Grounded on the teacher's `Prolink::{join,next,terminate}` in `lib.rs`:
//! same shape (spawn child tasks, block on a readiness signal, hand back one
//! `mpsc::Receiver` to drain), generalized from the teacher's fixed
//! membership/status/metadata/beat task set to this crate's
//! announce/update/beat sockets plus the Virtual CDJ's own keep-alive loop.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use mac_address::mac_address_by_name;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub mod beat_sender;
pub mod config;
pub mod error;
pub mod listener;
pub mod metadata;
pub mod metronome;
pub mod model;
pub mod net;
pub mod registry;
pub mod subnet;
pub mod virtual_cdj;
pub mod wire;

pub use config::Config;
pub use error::{PdjError, Result};
pub use model::{DeviceAnnouncement, DeviceReference, DeviceUpdate};

use listener::{DeliveryStrategy, EventBus};
use net::announce::AnnounceSocket;
use net::beat::{BeatEvent, BeatSocket};
use net::update::{MediaEvent, UpdateSocket};
use registry::{DeviceRegistry, RegistryEvent};
use virtual_cdj::{MasterEvent, OutboundSocket, VirtualCdj, VirtualCdjHandle};
use wire::packet::HelloPacket;

/// How often [`Pdj::join`] polls the registry while waiting for the first
/// device to be observed (spec.md §3: "Virtual-CDJ: started once the
/// registry has at least one observed device").
const FIRST_DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One event delivered through [`Pdj::next`]: the union of everything the
/// registry, update socket, beat socket, and Virtual CDJ's master-election
/// state machine can report (spec.md §4.9's "device found/lost, update,
/// beat, master, on-air, sync, master-handoff, lifecycle" event families,
/// minus the lifecycle notifications — those are logged, not queued, since
/// nothing downstream of this facade currently consumes them).
#[derive(Debug, Clone)]
pub enum Message {
    DeviceFound(DeviceAnnouncement),
    DeviceLost(DeviceAnnouncement),
    Update(DeviceUpdate),
    Beat(BeatEvent),
    MasterChanged(Option<u8>),
    Media(MediaEvent),
}

/// A live Virtual-CDJ session: three running receive loops, a keep-alive
/// broadcaster, and one channel to drain everything they observe.
pub struct Pdj {
    cdj: VirtualCdj,
    registry: Arc<DeviceRegistry>,
    msg_rx: mpsc::Receiver<Message>,
    child_tasks: Vec<JoinHandle<()>>,
    // Kept alive only because `EventBus` holds weak references to its
    // subscribers; these are never read again after `join()` returns.
    _registry_handle: Arc<dyn Fn(&RegistryEvent) + Send + Sync>,
    _update_handle: Arc<dyn Fn(&DeviceUpdate) + Send + Sync>,
    _beat_handle: Arc<dyn Fn(&BeatEvent) + Send + Sync>,
    _master_handle: Arc<dyn Fn(&MasterEvent) + Send + Sync>,
    _media_handle: Arc<dyn Fn(&MediaEvent) + Send + Sync>,
}

impl Pdj {
    /// Join the network: bind C3/C4/C5, wait for the first observed device
    /// so an interface can be chosen, then start the Virtual CDJ's
    /// presence/keep-alive loop (spec.md §4.7 `start()`).
    pub async fn join(config: Config) -> Result<Pdj> {
        let (msg_tx, msg_rx) = mpsc::channel(256);

        let registry_events = EventBus::<RegistryEvent>::new(config.registry_delivery.clone());
        let registry = Arc::new(DeviceRegistry::new(registry_events.clone()));

        let master_events = EventBus::<MasterEvent>::new(DeliveryStrategy::Inline);
        let beat_events = EventBus::<BeatEvent>::new(DeliveryStrategy::Inline);
        let update_events = EventBus::<DeviceUpdate>::new(DeliveryStrategy::Inline);
        let media_events = EventBus::<MediaEvent>::new(DeliveryStrategy::Inline);

        let announce_socket = AnnounceSocket::bind(Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST).await?;
        let beat_socket = BeatSocket::bind(Ipv4Addr::BROADCAST, beat_events.clone()).await?;

        let cdj = VirtualCdjHandle::new(
            config.device_num,
            config.name.clone(),
            announce_socket.clone() as Arc<dyn OutboundSocket>,
            beat_socket.clone() as Arc<dyn OutboundSocket>,
            master_events.clone(),
        );

        let mut child_tasks = Vec::new();
        child_tasks.push({
            let sock = announce_socket.clone();
            let registry = registry.clone();
            let cdj = cdj.clone();
            tokio::spawn(async move { sock.run(registry, cdj).await })
        });
        child_tasks.push({
            let sock = beat_socket.clone();
            let registry = registry.clone();
            let cdj = cdj.clone();
            tokio::spawn(async move { sock.run(registry, cdj).await })
        });

        // Interface selection needs an already-observed device address
        // (spec.md §4.4), so the announce loop above must run for a moment
        // before we can finish starting up.
        let first_device_addr = loop {
            if let Some(device) = registry.current_devices().await.into_iter().next() {
                break device.address;
            }
            tokio::time::sleep(FIRST_DEVICE_POLL_INTERVAL).await;
        };

        let (iface_name, local_addr) = match &config.interface_name {
            Some(name) => (name.clone(), subnet::resolve_named_interface(name)?),
            None => subnet::pick_interface(first_device_addr)?,
        };
        let mac = mac_address_by_name(&iface_name)
            .map_err(|e| PdjError::Anyhow(anyhow::anyhow!(e)))?
            .ok_or(PdjError::NoMatchingInterface)?;
        cdj.set_identity(mac.bytes(), local_addr).await;

        // Self-ignore protocol (spec.md §5): our own broadcasts must not
        // re-enter the registry/update pipeline as if they came from a peer.
        announce_socket.add_ignored_address(local_addr).await;

        let update_socket = UpdateSocket::bind(
            &registry,
            first_device_addr,
            Ipv4Addr::BROADCAST,
            update_events.clone(),
            media_events.clone(),
        )
        .await?;
        update_socket.add_ignored_address(local_addr).await;
        cdj.set_update_socket(update_socket.clone() as Arc<dyn OutboundSocket>).await;
        child_tasks.push({
            let sock = update_socket.clone();
            let registry = registry.clone();
            let cdj = cdj.clone();
            tokio::spawn(async move { sock.run(registry, cdj).await })
        });

        let hello = HelloPacket {
            name: config.name.clone(),
        };
        announce_socket.send_broadcast(hello.write()).await?;

        child_tasks.push({
            let registry = registry.clone();
            let cdj = cdj.clone();
            let interval = config.keep_alive_interval;
            tokio::spawn(async move { keep_alive_loop(registry, cdj, interval).await })
        });

        let registry_handle: Arc<dyn Fn(&RegistryEvent) + Send + Sync> = {
            let msg_tx = msg_tx.clone();
            Arc::new(move |event: &RegistryEvent| {
                let msg = match event {
                    RegistryEvent::DeviceFound(a) => Message::DeviceFound(a.clone()),
                    RegistryEvent::DeviceLost(a) => Message::DeviceLost(a.clone()),
                };
                let _ = msg_tx.try_send(msg);
            })
        };
        registry_events.subscribe(&registry_handle);

        let update_handle: Arc<dyn Fn(&DeviceUpdate) + Send + Sync> = {
            let msg_tx = msg_tx.clone();
            Arc::new(move |event: &DeviceUpdate| {
                let _ = msg_tx.try_send(Message::Update(event.clone()));
            })
        };
        update_events.subscribe(&update_handle);

        let beat_handle: Arc<dyn Fn(&BeatEvent) + Send + Sync> = {
            let msg_tx = msg_tx.clone();
            Arc::new(move |event: &BeatEvent| {
                let _ = msg_tx.try_send(Message::Beat(event.clone()));
            })
        };
        beat_events.subscribe(&beat_handle);

        let master_handle: Arc<dyn Fn(&MasterEvent) + Send + Sync> = {
            let msg_tx = msg_tx.clone();
            Arc::new(move |event: &MasterEvent| {
                let MasterEvent::MasterChanged(device_number) = event;
                let _ = msg_tx.try_send(Message::MasterChanged(*device_number));
            })
        };
        master_events.subscribe(&master_handle);

        let media_handle: Arc<dyn Fn(&MediaEvent) + Send + Sync> = {
            let msg_tx = msg_tx.clone();
            Arc::new(move |event: &MediaEvent| {
                let _ = msg_tx.try_send(Message::Media(event.clone()));
            })
        };
        media_events.subscribe(&media_handle);

        Ok(Pdj {
            cdj,
            registry,
            msg_rx,
            child_tasks,
            _registry_handle: registry_handle,
            _update_handle: update_handle,
            _beat_handle: beat_handle,
            _master_handle: master_handle,
            _media_handle: media_handle,
        })
    }

    /// Block for the next event observed on the network.
    pub async fn next(&mut self) -> Result<Message> {
        self.msg_rx.recv().await.ok_or(PdjError::NotRunning)
    }

    /// Stop every running task and release the session.
    pub async fn terminate(self) {
        drop(self.msg_rx);
        for task in self.child_tasks {
            let _ = task.await;
        }
    }

    pub async fn set_tempo(&self, bpm: f64) {
        self.cdj.set_tempo(bpm).await;
    }

    pub async fn set_playing(&self, playing: bool) {
        self.cdj.set_playing(playing).await;
    }

    pub async fn set_synced(&self, synced: bool) {
        self.cdj.set_synced(synced).await;
    }

    pub async fn set_on_air(&self, on_air: bool) {
        self.cdj.set_on_air(on_air).await;
    }

    /// Request tempo mastership (spec.md §4.7 `become_master()`): finds the
    /// current master from the latest-status cache, if any, and negotiates
    /// the handoff.
    pub async fn become_master(&self) -> Result<()> {
        let current_master = self
            .cdj
            .get_tempo_master()
            .await
            .map(|update| update.device_number());
        self.cdj.become_master(current_master).await
    }

    pub async fn get_tempo_master(&self) -> Option<DeviceUpdate> {
        self.cdj.get_tempo_master().await
    }

    pub async fn get_latest_status_for(&self, reference: &DeviceReference) -> Option<DeviceUpdate> {
        self.cdj.get_latest_status_for(reference).await
    }

    pub async fn current_devices(&self) -> Vec<DeviceAnnouncement> {
        self.registry.current_devices().await
    }
}

/// Broadcasts a keep-alive and a status packet every `interval`, and
/// reasserts a timed-out `YieldingMaster` grant (spec.md §3: "C7 owns one
/// periodic-broadcast thread (keep-alive/status)"; §4.7 transition table
/// last row).
async fn keep_alive_loop(registry: Arc<DeviceRegistry>, cdj: VirtualCdj, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let peer_count = registry.current_devices().await.len() as u8;
        if let Err(e) = cdj.send_keep_alive(peer_count).await {
            log::error!(target: "prolink", "keep-alive send failed: {}", e);
        }
        if let Err(e) = cdj.send_status().await {
            log::error!(target: "prolink", "status send failed: {}", e);
        }
        cdj.poll_yield_timeout().await;
    }
}
