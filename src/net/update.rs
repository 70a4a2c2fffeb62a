//! C4: the update socket, port 50002. Decodes CDJ/mixer status and precise
//! position reports and feeds them into the Virtual CDJ's status cache and
//! the update listener fabric.
//!
//! Grounded on `tasks/status.rs` in the teacher crate: same bind/select
//! receive-loop shape, generalized from its single `CdjStatus`-only decode
//! to the full `DeviceUpdate` family plus the media-exchange passthrough
//! spec.md §4.4/§4.11 name.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};

use crate::error::{PdjError, Result};
use crate::listener::EventBus;
use crate::model::DeviceUpdate;
use crate::registry::DeviceRegistry;
use crate::subnet;
use crate::virtual_cdj::{OutboundSocket, VirtualCdj};
use crate::wire::codec::PORT_UPDATE;
use crate::wire::packet::{MediaPacket, Packet};

pub const PORT: u16 = PORT_UPDATE;

#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// `MEDIA_QUERY`/`MEDIA_RESPONSE`/`LOAD_TRACK_ACK`, carried forward raw
    /// for a dbserver client built on top of this crate to consume (spec.md
    /// §9 Open Questions: "treat as a boundary adapter").
    Raw(MediaPacket),
}

pub struct UpdateSocket {
    socket: UdpSocket,
    broadcast_addr: SocketAddr,
    ignored_addresses: Mutex<HashSet<Ipv4Addr>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    updates: Arc<EventBus<DeviceUpdate>>,
    media: Arc<EventBus<MediaEvent>>,
}

impl UpdateSocket {
    /// Bind on the interface matching `device_addr`'s subnet (spec.md §4.4:
    /// "requires the registry has at least one known device before it can
    /// pick an interface"). Also used to broadcast the Virtual CDJ's own
    /// outbound status packets (spec.md dataflow: "C7 ... send through
    /// C3/C4/C5 sockets").
    pub async fn bind(
        registry: &DeviceRegistry,
        device_addr: Ipv4Addr,
        broadcast_addr: Ipv4Addr,
        updates: Arc<EventBus<DeviceUpdate>>,
        media: Arc<EventBus<MediaEvent>>,
    ) -> Result<Arc<Self>> {
        if registry.is_empty().await {
            return Err(PdjError::NotRunning);
        }

        let (_iface_name, local_addr) = subnet::pick_interface(device_addr)?;
        let socket = UdpSocket::bind(SocketAddr::new(local_addr.into(), PORT)).await?;
        socket.set_broadcast(true)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Arc::new(UpdateSocket {
            socket,
            broadcast_addr: SocketAddr::new(broadcast_addr.into(), PORT),
            ignored_addresses: Mutex::new(HashSet::new()),
            shutdown_tx,
            shutdown_rx,
            updates,
            media,
        }))
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Registered by the Virtual CDJ's self-ignore protocol so its own
    /// outbound status/beats never re-enter the pipeline (spec.md §5).
    pub async fn add_ignored_address(&self, address: Ipv4Addr) {
        self.ignored_addresses.lock().await.insert(address);
    }

    pub async fn remove_ignored_address(&self, address: Ipv4Addr) {
        self.ignored_addresses.lock().await.remove(&address);
    }

    pub async fn is_address_ignored(&self, address: Ipv4Addr) -> bool {
        self.ignored_addresses.lock().await.contains(&address)
    }

    pub async fn run(self: Arc<Self>, registry: Arc<DeviceRegistry>, cdj: VirtualCdj) {
        let mut buf = [0u8; 2048];
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            if *shutdown_rx.borrow() {
                return;
            }

            let timeout = super::adaptive_timeout(registry.is_empty().await);
            let recv = tokio::time::timeout(timeout, self.socket.recv_from(&mut buf));

            tokio::select! {
                result = recv => {
                    match result {
                        Ok(Ok((len, SocketAddr::V4(from)))) => {
                            self.handle_datagram(&buf[..len], *from.ip(), &cdj).await;
                        }
                        Ok(Ok((_, SocketAddr::V6(_)))) => {}
                        Ok(Err(e)) => {
                            log::error!(target: "prolink", "update socket error: {}", e);
                            return;
                        }
                        Err(_elapsed) => {}
                    }
                }
                _ = shutdown_rx.changed() => {
                    return;
                }
            }
        }
    }

    async fn handle_datagram(&self, data: &[u8], from: Ipv4Addr, cdj: &VirtualCdj) {
        if self.is_address_ignored(from).await {
            return;
        }

        match Packet::parse(data, PORT_UPDATE) {
            Ok(Packet::CdjStatus(status)) => {
                let update = DeviceUpdate::CdjStatus {
                    address: from,
                    timestamp: Instant::now(),
                    name: status.name.clone(),
                    device_number: status.device_num,
                    raw: data.to_vec(),
                    status,
                };
                self.record_and_publish(cdj, update).await;
            }
            Ok(Packet::MixerStatus(status)) => {
                let update = DeviceUpdate::MixerStatus {
                    address: from,
                    timestamp: Instant::now(),
                    name: status.name.clone(),
                    device_number: status.device_num,
                    raw: data.to_vec(),
                    status,
                };
                self.record_and_publish(cdj, update).await;
            }
            Ok(Packet::PrecisePosition(position)) => {
                let update = DeviceUpdate::PrecisePosition {
                    address: from,
                    timestamp: Instant::now(),
                    name: position.name.clone(),
                    device_number: position.device_num,
                    raw: data.to_vec(),
                    position,
                };
                self.record_and_publish(cdj, update).await;
            }
            Ok(Packet::Media(pkt)) => {
                self.media.publish(MediaEvent::Raw(pkt));
            }
            Ok(_other) => {}
            Err(e) => {
                log::debug!(target: "prolink", "dropping malformed update-port packet: {}", e);
            }
        }
    }

    async fn record_and_publish(&self, cdj: &VirtualCdj, update: DeviceUpdate) {
        let reference = update.device_reference();
        cdj.record_update(reference, update.clone()).await;
        self.updates.publish(update);
    }
}

impl OutboundSocket for UpdateSocket {
    fn send_broadcast<'a>(
        &'a self,
        datagram: Vec<u8>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.socket.send_to(&datagram, self.broadcast_addr).await?;
            Ok(())
        })
    }
}
