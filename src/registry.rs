//! C6: the device registry. The presence tracker keyed by `DeviceReference`
//! spec.md §4.6 and §3 describe.
//!
//! Grounded on the teacher's `peers: HashMap<u8, Peer>` bookkeeping in
//! `tasks/status.rs`/`tasks/membership.rs`, generalized from a
//! device-number-keyed map to the full `DeviceReference` key and the
//! expiry/defend/listener-asymmetry semantics spec.md §4.6 adds.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::listener::EventBus;
use crate::model::{DeviceAnnouncement, DeviceReference, EXPIRY};

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    DeviceFound(DeviceAnnouncement),
    DeviceLost(DeviceAnnouncement),
}

struct Inner {
    devices: HashMap<DeviceReference, DeviceAnnouncement>,
    first_seen_at: Option<Instant>,
    ignored_addresses: std::collections::HashSet<Ipv4Addr>,
}

/// The concurrent device directory. `update`/`expire`/`flush` take the
/// write lock; `current_devices`/`is_address_ignored` take the read lock —
/// callers never observe a partially-mutated map (spec.md §4.6:
/// "callers never see a partially-mutated map").
pub struct DeviceRegistry {
    inner: RwLock<Inner>,
    events: Arc<EventBus<RegistryEvent>>,
}

impl DeviceRegistry {
    pub fn new(events: Arc<EventBus<RegistryEvent>>) -> Self {
        DeviceRegistry {
            inner: RwLock::new(Inner {
                devices: HashMap::new(),
                first_seen_at: None,
                ignored_addresses: std::collections::HashSet::new(),
            }),
            events,
        }
    }

    pub async fn add_ignored_address(&self, address: Ipv4Addr) {
        self.inner.write().await.ignored_addresses.insert(address);
    }

    pub async fn remove_ignored_address(&self, address: Ipv4Addr) {
        self.inner.write().await.ignored_addresses.remove(&address);
    }

    pub async fn is_address_ignored(&self, address: Ipv4Addr) -> bool {
        self.inner.read().await.ignored_addresses.contains(&address)
    }

    /// Insert or refresh an announcement. Deferred delivery off the
    /// caller's task (spec.md §4.6: "the announcement path delivers on a
    /// UI/dispatch-style pool") — the bus's own `BoundedQueue` strategy is
    /// expected to be used here; `publish` never blocks the caller.
    pub async fn update(&self, announcement: DeviceAnnouncement) {
        let reference = announcement.device_reference();
        let mut inner = self.inner.write().await;
        let is_new = !inner.devices.contains_key(&reference);
        if inner.first_seen_at.is_none() {
            inner.first_seen_at = Some(announcement.timestamp);
        }
        inner.devices.insert(reference, announcement.clone());
        drop(inner);

        if is_new {
            self.events.publish(RegistryEvent::DeviceFound(announcement));
        }
    }

    /// Remove entries silent for longer than `EXPIRY`, emitting
    /// `DeviceLost` for each (spec.md §4.6).
    pub async fn expire(&self) {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let mut lost = Vec::new();
        inner.devices.retain(|_, announcement| {
            if now.duration_since(announcement.timestamp) >= EXPIRY {
                lost.push(announcement.clone());
                false
            } else {
                true
            }
        });
        if inner.devices.is_empty() {
            inner.first_seen_at = None;
        }
        drop(inner);

        for announcement in lost {
            self.events.publish(RegistryEvent::DeviceLost(announcement));
        }
    }

    /// Atomic snapshot-then-clear (spec.md §4.6).
    pub async fn flush(&self) {
        let mut inner = self.inner.write().await;
        let removed: Vec<_> = inner.devices.drain().map(|(_, a)| a).collect();
        inner.first_seen_at = None;
        drop(inner);

        for announcement in removed {
            self.events.publish(RegistryEvent::DeviceLost(announcement));
        }
    }

    pub async fn current_devices(&self) -> Vec<DeviceAnnouncement> {
        self.inner.read().await.devices.values().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.devices.is_empty()
    }

    pub async fn first_seen_at(&self) -> Option<Instant> {
        self.inner.read().await.first_seen_at
    }

    pub async fn get(&self, reference: &DeviceReference) -> Option<DeviceAnnouncement> {
        self.inner.read().await.devices.get(reference).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::DeliveryStrategy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn announcement(device_number: u8, address: Ipv4Addr) -> DeviceAnnouncement {
        DeviceAnnouncement {
            address,
            timestamp: Instant::now(),
            name: "CDJ-2000".to_string(),
            device_number,
            hardware_address: [0; 6],
            peer_count: 1,
            is_opus_quad: false,
            is_xdj_az: false,
            raw: vec![],
        }
    }

    #[tokio::test]
    async fn update_emits_device_found_only_once() {
        let found = Arc::new(AtomicUsize::new(0));
        let bus = EventBus::<RegistryEvent>::new(DeliveryStrategy::Inline);
        let found_clone = found.clone();
        let handle: Arc<dyn Fn(&RegistryEvent) + Send + Sync> = Arc::new(move |event| {
            if matches!(event, RegistryEvent::DeviceFound(_)) {
                found_clone.fetch_add(1, Ordering::SeqCst);
            }
        });
        bus.subscribe(&handle);

        let registry = DeviceRegistry::new(bus);
        let addr = Ipv4Addr::new(192, 168, 1, 5);
        registry.update(announcement(1, addr)).await;
        registry.update(announcement(1, addr)).await;

        assert_eq!(found.load(Ordering::SeqCst), 1);
        assert_eq!(registry.current_devices().await.len(), 1);
    }

    #[tokio::test]
    async fn expire_removes_stale_entries_and_resets_first_seen() {
        let bus = EventBus::<RegistryEvent>::new(DeliveryStrategy::Inline);
        let registry = DeviceRegistry::new(bus);
        let addr = Ipv4Addr::new(192, 168, 1, 6);

        let mut stale = announcement(2, addr);
        stale.timestamp = Instant::now() - crate::model::EXPIRY - std::time::Duration::from_millis(1);
        registry.update(stale).await;

        registry.expire().await;
        assert!(registry.is_empty().await);
        assert!(registry.first_seen_at().await.is_none());
    }

    #[tokio::test]
    async fn flush_clears_everything() {
        let bus = EventBus::<RegistryEvent>::new(DeliveryStrategy::Inline);
        let registry = DeviceRegistry::new(bus);
        registry
            .update(announcement(3, Ipv4Addr::new(10, 0, 0, 2)))
            .await;
        registry.flush().await;
        assert!(registry.is_empty().await);
    }
}
