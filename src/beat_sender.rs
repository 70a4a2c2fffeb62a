//! C8: the high-precision beat emitter. Spec.md §4.8's hybrid sleep/
//! busy-wait loop, run on a `spawn_blocking` task so its near-beat
//! busy-wait span doesn't starve the async executor's other tasks
//! (SPEC_FULL.md §5).
//!
//! No direct counterpart in the teacher crate, which never originates
//! beats; grounded on the `tasks::beat::BeatTask` receive-loop shape
//! (dedicated task, `tokio::select!` against a shutdown signal) with the
//! rearm/threshold state machine spec.md §4.8 specifies layered on top.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::metronome::Metronome;
use crate::virtual_cdj::VirtualCdj;

/// Shared handle to the live tempo/timeline source: `VirtualCdjHandle` owns
/// one and mutates it from `set_tempo`; the beat-emission loop reads a
/// snapshot from it every iteration so a tempo change while playing is
/// picked up on the very next loop pass rather than requiring a restart.
pub type SharedMetronome = Arc<Mutex<Metronome>>;

/// A beat is sent when we're within this much of its due time
/// (spec.md §4.8 step 4).
pub const BEAT_THRESHOLD: Duration = Duration::from_millis(10);

/// Below this much time-to-next-beat we busy-wait instead of sleeping
/// (spec.md §4.8 step 5).
pub const SLEEP_THRESHOLD: Duration = Duration::from_millis(5);

/// Interrupts the sleeping/busy-waiting loop: either the timeline changed
/// (tempo/pitch edit) or the sender is shutting down.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    None,
    TimelineChanged,
    ShutDown,
}

struct Signal {
    state: Mutex<Interrupt>,
    condvar: Condvar,
}

pub struct BeatSender {
    signal: Arc<Signal>,
}

impl BeatSender {
    /// Spawn the beat-emission loop on a dedicated OS thread via
    /// `spawn_blocking` (SPEC_FULL.md §5), so its busy-wait span near a
    /// beat boundary doesn't starve the async executor. Lives only while
    /// the Virtual CDJ keeps the handle alive (spec.md §3: "Beat Sender:
    /// lives only while Virtual-CDJ is both sending status and marked
    /// playing").
    pub fn spawn(cdj: VirtualCdj, metronome: SharedMetronome) -> Self {
        let signal = Arc::new(Signal {
            state: Mutex::new(Interrupt::None),
            condvar: Condvar::new(),
        });
        let signal_for_task = signal.clone();

        tokio::task::spawn_blocking(move || {
            run_loop(cdj, metronome, &signal_for_task);
        });

        BeatSender { signal }
    }

    fn raise(&self, interrupt: Interrupt) {
        *self.signal.state.lock().unwrap() = interrupt;
        self.signal.condvar.notify_one();
    }

    /// Wake the loop so it re-reads the metronome on the next iteration
    /// (spec.md §4.8 step 6: "`timeline_changed()` interrupts the sleep").
    pub fn timeline_changed(&self) {
        self.raise(Interrupt::TimelineChanged);
    }

    pub fn shut_down(&self) {
        self.raise(Interrupt::ShutDown);
    }
}

fn run_loop(cdj: VirtualCdj, metronome: SharedMetronome, signal: &Signal) {
    let mut last_sent_beat: Option<u64> = None;

    loop {
        if *signal.state.lock().unwrap() == Interrupt::ShutDown {
            return;
        }

        let snapshot = metronome.lock().unwrap().snapshot();

        if let Some(sent) = last_sent_beat {
            if snapshot.beat_phase > 0.5 || snapshot.beat > sent {
                last_sent_beat = None;
            }
        }

        let current_beat_due = snapshot.time_of_beat(snapshot.beat);
        let next_beat_due = snapshot.time_of_beat(snapshot.beat + 1);

        let since_due = snapshot.instant.saturating_duration_since(current_beat_due);
        if since_due < BEAT_THRESHOLD && last_sent_beat != Some(snapshot.beat) {
            cdj.send_beat(&snapshot);
            last_sent_beat = Some(snapshot.beat);
        }

        let now = Instant::now();
        let until_next = next_beat_due.saturating_duration_since(now);

        if until_next > SLEEP_THRESHOLD {
            // Wait on the condvar with a timeout so `timeline_changed()`/
            // `shut_down()` from another thread interrupt the sleep
            // immediately instead of waiting out the full duration
            // (spec.md §4.8 step 6).
            let sleep_for = until_next - SLEEP_THRESHOLD;
            let guard = signal.state.lock().unwrap();
            let (guard, _timeout_result) = signal
                .condvar
                .wait_timeout_while(guard, sleep_for, |state| *state == Interrupt::None)
                .unwrap();
            if *guard == Interrupt::ShutDown {
                return;
            }
            drop(guard);
            *signal.state.lock().unwrap() = Interrupt::None;
        } else {
            while Instant::now() < next_beat_due {
                if *signal.state.lock().unwrap() == Interrupt::ShutDown {
                    return;
                }
                std::hint::spin_loop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_match_spec() {
        assert_eq!(BEAT_THRESHOLD, Duration::from_millis(10));
        assert_eq!(SLEEP_THRESHOLD, Duration::from_millis(5));
    }
}
