//! C3/C4/C5: the three UDP receive loops. Each owns one
//! `tokio::net::UdpSocket` and runs as a dedicated tokio task selecting
//! between the socket's `recv_from`, an adaptive timeout, and a shutdown
//! watch channel — the async-task realization of spec.md §5's "one
//! blocking receive thread per socket" (SPEC_FULL.md §2/§5).
//!
//! Grounded on `tasks::{membership,status,beat}` in the teacher crate.

pub mod announce;
pub mod beat;
pub mod update;

use std::time::Duration;

/// Adaptive receive timeout shared by C3/C4/C5 (spec.md §4.3): a long
/// timeout while nothing is known yet (so startup doesn't spin), a short
/// one once at least one device is known (so expiry can fire promptly).
pub fn adaptive_timeout(registry_is_empty: bool) -> Duration {
    if registry_is_empty {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(1)
    }
}
