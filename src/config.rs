//! `Config`, carried from the teacher crate's `lib.rs::Config` and
//! generalized with the fields the expanded Virtual CDJ and Listener
//! Fabric need (SPEC_FULL.md §7.1). Still a plain struct built by the
//! caller — no file/env loading, matching spec.md §6's "no CLI, no
//! configuration file format".

use std::time::Duration;

use crate::listener::DeliveryStrategy;
use crate::virtual_cdj::KEEP_ALIVE_INTERVAL;

/// Configuration for [`crate::Pdj::join`].
#[derive(Clone)]
pub struct Config {
    /// The name this Virtual CDJ announces itself under.
    pub name: String,
    /// The device number to claim. Must be in `1..=4` (spec.md §4.7).
    pub device_num: u8,
    /// Override automatic interface selection (spec.md §4.10); normally
    /// left `None` so [`crate::subnet::pick_interface`] chooses.
    pub interface_name: Option<String>,
    /// How often the Virtual CDJ re-broadcasts its keep-alive (spec.md
    /// §4.7: "every 1.5s" by default).
    pub keep_alive_interval: Duration,
    /// Delivery strategy for the device-registry's `DeviceFound`/
    /// `DeviceLost` listener path (spec.md §9 "Re-architecture of source
    /// idioms": the announcement path is deferred by default).
    pub registry_delivery: DeliveryStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: "Virtual CDJ".to_string(),
            device_num: 4,
            interface_name: None,
            keep_alive_interval: KEEP_ALIVE_INTERVAL,
            registry_delivery: DeliveryStrategy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keep_alive_interval_matches_spec() {
        assert_eq!(Config::default().keep_alive_interval, Duration::from_millis(1500));
    }
}
