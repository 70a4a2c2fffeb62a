//! C3: the announcement socket, port 50000.
//!
//! Grounded on `tasks/membership.rs`'s bind/receive-loop/keep-alive
//! structure in the teacher crate, generalized from its fixed
//! `HashMap<u8, Peer>` bookkeeping to feeding the shared `DeviceRegistry`.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};

use crate::error::Result;
use crate::model::DeviceAnnouncement;
use crate::registry::DeviceRegistry;
use crate::virtual_cdj::{OutboundSocket, VirtualCdj};
use crate::wire::codec::PORT_ANNOUNCE;
use crate::wire::packet::Packet;

pub struct AnnounceSocket {
    socket: UdpSocket,
    broadcast_addr: SocketAddr,
    ignored_addresses: Mutex<HashSet<Ipv4Addr>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl AnnounceSocket {
    pub async fn bind(local_addr: Ipv4Addr, broadcast_addr: Ipv4Addr) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, PORT_ANNOUNCE)).await?;
        socket.set_broadcast(true)?;
        let _ = local_addr;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Arc::new(AnnounceSocket {
            socket,
            broadcast_addr: SocketAddr::new(broadcast_addr.into(), PORT_ANNOUNCE),
            ignored_addresses: Mutex::new(HashSet::new()),
            shutdown_tx,
            shutdown_rx,
        }))
    }

    pub async fn add_ignored_address(&self, address: Ipv4Addr) {
        self.ignored_addresses.lock().await.insert(address);
    }

    pub async fn remove_ignored_address(&self, address: Ipv4Addr) {
        self.ignored_addresses.lock().await.remove(&address);
    }

    pub async fn is_address_ignored(&self, address: Ipv4Addr) -> bool {
        self.ignored_addresses.lock().await.contains(&address)
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the receive loop until `stop()` is called. `cdj` receives
    /// anything recognized that isn't `DEVICE_KEEP_ALIVE`/`DEVICE_HELLO`
    /// (spec.md §4.3: "forward to Virtual CDJ's special-announcement
    /// hook").
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
                            self.handle_datagram(&buf[..len], *from.ip(), &registry, &cdj).await;
                        }
                        Ok(Ok((_, SocketAddr::V6(_)))) => {}
                        Ok(Err(e)) => {
                            log::error!(target: "prolink", "announcement socket error: {}", e);
                            return;
                        }
                        Err(_elapsed) => {
                            registry.expire().await;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    return;
                }
            }
        }
    }

    async fn handle_datagram(
        &self,
        data: &[u8],
        from: Ipv4Addr,
        registry: &Arc<DeviceRegistry>,
        cdj: &VirtualCdj,
    ) {
        if self.is_address_ignored(from).await {
            return;
        }

        match Packet::parse(data, PORT_ANNOUNCE) {
            Ok(Packet::KeepAlive(pkt)) => {
                let collision = pkt.device_num == cdj.device_number;
                let announcement = DeviceAnnouncement::from_packet(from, &pkt, data);
                registry.update(announcement).await;
                if collision {
                    let _ = cdj.defend(pkt.peer_count).await;
                }
            }
            Ok(Packet::Hello(_)) => {}
            Ok(_other) => {
                // Number-claim negotiation packets and anything else
                // recognized on this port: not this crate's concern once
                // our own join sequence has completed (spec.md §4.3).
            }
            Err(e) => {
                log::debug!(target: "prolink", "dropping malformed announcement packet: {}", e);
            }
        }
    }
}

impl OutboundSocket for AnnounceSocket {
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
