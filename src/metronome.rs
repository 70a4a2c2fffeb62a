//! The tempo/timeline origin shared by the Virtual CDJ (C7) and the Beat
//! Sender (C8): spec.md §4.8's `Snapshot` (instant + beat index +
//! beat-phase).
//!
//! No direct counterpart in the teacher crate (which never emits beats of
//! its own) — grounded on the timing fields `proto.rs`'s `BeatPacket`
//! already carries (bpm, pitch), generalized into the wall-clock timeline
//! math spec.md §4.8 needs.

use std::time::{Duration, Instant};

use crate::wire::codec::pitch_to_multiplier;

/// A point-in-time view of the beat timeline: which beat is current, how
/// far through it we are, and the tempo/pitch in force at that instant.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub instant: Instant,
    pub beat: u64,
    pub beat_phase: f64,
    pub bpm: f64,
    pub pitch: u32,
}

impl Snapshot {
    /// Effective beat duration at this snapshot's tempo/pitch.
    pub fn beat_duration(&self) -> Duration {
        let effective_bpm = self.bpm * pitch_to_multiplier(self.pitch);
        Duration::from_secs_f64(60.0 / effective_bpm)
    }

    /// The wall-clock instant at which `beat` is/was/will be due, computed
    /// relative to this snapshot's own position in the timeline.
    pub fn time_of_beat(&self, beat: u64) -> Instant {
        let delta_beats = beat as i64 - self.beat as i64;
        let beat_duration = self.beat_duration();
        let offset = beat_duration.mul_f64(delta_beats as f64 - self.beat_phase);
        if offset >= Duration::ZERO {
            self.instant + offset
        } else {
            self.instant - (-offset)
        }
    }
}

/// The live tempo/timeline source: a starting instant, a starting beat
/// index, and the current bpm/pitch. `Metronome::snapshot()` projects the
/// continuously-running timeline forward to "now".
pub struct Metronome {
    origin: Instant,
    origin_beat: u64,
    bpm: f64,
    pitch: u32,
}

impl Metronome {
    pub fn new(bpm: f64) -> Self {
        Metronome {
            origin: Instant::now(),
            origin_beat: 0,
            bpm,
            pitch: 1_048_576,
        }
    }

    pub fn set_tempo(&mut self, bpm: f64) {
        let snap = self.snapshot();
        self.origin = snap.instant;
        self.origin_beat = snap.beat;
        self.bpm = bpm;
    }

    pub fn set_pitch(&mut self, pitch: u32) {
        let snap = self.snapshot();
        self.origin = snap.instant;
        self.origin_beat = snap.beat;
        self.pitch = pitch;
    }

    pub fn snapshot(&self) -> Snapshot {
        let now = Instant::now();
        let beat_duration = {
            let effective_bpm = self.bpm * pitch_to_multiplier(self.pitch);
            Duration::from_secs_f64(60.0 / effective_bpm)
        };
        let elapsed = now.duration_since(self.origin);
        let beats_elapsed = elapsed.as_secs_f64() / beat_duration.as_secs_f64();
        let beat = self.origin_beat + beats_elapsed.floor() as u64;
        let beat_phase = beats_elapsed.fract();

        Snapshot {
            instant: now,
            beat,
            beat_phase,
            bpm: self.bpm,
            pitch: self.pitch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_advances_with_tempo() {
        let metronome = Metronome::new(120.0);
        let snap = metronome.snapshot();
        assert_eq!(snap.beat, 0);
        assert!(snap.beat_phase < 1.0);
    }

    #[test]
    fn time_of_beat_is_symmetric_around_current_beat() {
        let snap = Snapshot {
            instant: Instant::now(),
            beat: 10,
            beat_phase: 0.0,
            bpm: 120.0,
            pitch: 1_048_576,
        };
        let this_beat = snap.time_of_beat(10);
        let next_beat = snap.time_of_beat(11);
        assert!(next_beat > this_beat);
        let delta = next_beat.duration_since(this_beat);
        assert!((delta.as_secs_f64() - 0.5).abs() < 1e-6);
    }
}
