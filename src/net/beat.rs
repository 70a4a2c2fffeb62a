//! C5: the beat socket, port 50001. Receives `BEAT`, `FADER_START`,
//! `CHANNELS_ON_AIR`, `SYNC_CONTROL`, and the master-handoff pair; sends
//! outbound beats, handoff messages, and sync-control messages.
//!
//! Grounded on `tasks/beat.rs` in the teacher crate, expanded from its
//! single `BEAT`-only decode into the full port-50001 packet family
//! spec.md §4.5 names, with listener fan-out synchronous on the receive
//! task (spec.md §4.5: "implementers must document that listener work
//! must be brief").

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::error::Result;
use crate::listener::EventBus;
use crate::model::{DeviceReference, DeviceUpdate};
use crate::registry::DeviceRegistry;
use crate::virtual_cdj::{OutboundSocket, VirtualCdj};
use crate::wire::codec::PORT_BEAT;
use crate::wire::packet::Packet;

pub const PORT: u16 = PORT_BEAT;

#[derive(Debug, Clone)]
pub enum BeatEvent {
    Beat(DeviceUpdate),
    FaderStart { device_number: u8, started_mask: u8 },
    ChannelsOnAir { device_number: u8, on_air_mask: u8 },
}

pub struct BeatSocket {
    socket: UdpSocket,
    broadcast_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    events: Arc<EventBus<BeatEvent>>,
}

impl BeatSocket {
    pub async fn bind(broadcast_addr: Ipv4Addr, events: Arc<EventBus<BeatEvent>>) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, PORT)).await?;
        socket.set_broadcast(true)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Arc::new(BeatSocket {
            socket,
            broadcast_addr: SocketAddr::new(broadcast_addr.into(), PORT),
            shutdown_tx,
            shutdown_rx,
            events,
        }))
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
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
                            log::error!(target: "prolink", "beat socket error: {}", e);
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
        match Packet::parse(data, PORT_BEAT) {
            Ok(Packet::Beat(beat)) => {
                let reference = DeviceReference::new(beat.device_num, from);
                let update = DeviceUpdate::Beat {
                    address: from,
                    timestamp: std::time::Instant::now(),
                    name: beat.name.clone(),
                    device_number: beat.device_num,
                    raw: data.to_vec(),
                    beat,
                };
                cdj.record_update(reference, update.clone()).await;
                self.events.publish(BeatEvent::Beat(update));
            }
            Ok(Packet::FaderStart(pkt)) => {
                self.events.publish(BeatEvent::FaderStart {
                    device_number: pkt.device_num,
                    started_mask: pkt.started_mask,
                });
            }
            Ok(Packet::ChannelsOnAir(pkt)) => {
                self.events.publish(BeatEvent::ChannelsOnAir {
                    device_number: pkt.device_num,
                    on_air_mask: pkt.on_air_mask,
                });
            }
            Ok(Packet::SyncControl(_pkt)) => {}
            Ok(Packet::MasterHandoffRequest(pkt)) => {
                let _ = cdj.handle_handoff_request(pkt.device_num).await;
            }
            Ok(Packet::MasterHandoffResponse(pkt)) => {
                cdj.handle_handoff_response(pkt.granted).await;
            }
            Ok(_other) => {}
            Err(e) => {
                log::debug!(target: "prolink", "dropping malformed beat-port packet: {}", e);
            }
        }
    }
}

impl OutboundSocket for BeatSocket {
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
