//! `BeatGrid::from_blob` — spec.md §4.11's beat-grid blob layout: a
//! `length = 20 + 16*N` header followed by `N` 16-byte entries.
//!
//! No direct teacher counterpart (the teacher's dbserver client never
//! decodes the blobs it fetches); grounded on `metadata::encoding::Field`'s
//! `Blob` variant for the byte-access idiom and on the `beat-link` project's
//! documented `BeatGrid` entry layout referenced by spec.md §4.11.

use super::le_u32_at;
use crate::error::{PdjError, Result};

const ENTRY_STRIDE: usize = 16;
const BASE_OFFSET: usize = 20;

/// One beat-grid entry: a bar position (1..=4) and the track-relative time
/// of that beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatGridEntry {
    pub position_within_bar: u8,
    pub time_within_track_ms: u32,
}

/// A track's beat grid, decoded from a dbserver render-menu `Blob` field
/// (spec.md §4.11).
#[derive(Debug, Clone, PartialEq)]
pub struct BeatGrid {
    entries: Vec<BeatGridEntry>,
}

impl BeatGrid {
    pub fn from_blob(data: &[u8]) -> Result<BeatGrid> {
        if data.len() < BASE_OFFSET {
            return Err(PdjError::UnexpectedSlot(data.len() as u8));
        }
        let beat_count = (data.len() - BASE_OFFSET) / ENTRY_STRIDE;

        let mut entries = Vec::with_capacity(beat_count);
        for k in 0..beat_count {
            let offset = BASE_OFFSET + k * ENTRY_STRIDE;
            let position_within_bar = *data
                .get(offset)
                .ok_or(PdjError::UnexpectedSlot(offset as u8))?;
            let time_within_track_ms = le_u32_at(data, offset + 4)
                .ok_or(PdjError::UnexpectedSlot((offset + 4) as u8))?;
            entries.push(BeatGridEntry {
                position_within_bar,
                time_within_track_ms,
            });
        }

        Ok(BeatGrid { entries })
    }

    pub fn beat_count(&self) -> usize {
        self.entries.len()
    }

    /// `k` is zero-based; beat-grid entries are conventionally numbered
    /// from 1 in the protocol documentation, so callers index accordingly.
    pub fn entry(&self, k: usize) -> Option<BeatGridEntry> {
        self.entries.get(k).copied()
    }

    pub fn time_within_track(&self, k: usize) -> Option<u32> {
        self.entry(k).map(|e| e.time_within_track_ms)
    }

    pub fn position_within_bar(&self, k: usize) -> Option<u8> {
        self.entry(k).map(|e| e.position_within_bar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blob(entries: &[(u8, u32)]) -> Vec<u8> {
        let mut blob = vec![0u8; BASE_OFFSET];
        for (position, time_ms) in entries {
            let mut entry = [0u8; ENTRY_STRIDE];
            entry[0] = *position;
            entry[4..8].copy_from_slice(&time_ms.to_le_bytes());
            blob.extend_from_slice(&entry);
        }
        blob
    }

    #[test]
    fn decodes_entries_in_order() {
        let blob = sample_blob(&[(1, 350), (2, 850), (3, 1350), (4, 1850)]);
        let grid = BeatGrid::from_blob(&blob).unwrap();
        assert_eq!(grid.beat_count(), 4);
        assert_eq!(grid.position_within_bar(0), Some(1));
        assert_eq!(grid.time_within_track(3), Some(1850));
        assert_eq!(grid.entry(4), None);
    }

    #[test]
    fn rejects_a_header_shorter_than_the_base_offset() {
        assert!(BeatGrid::from_blob(&[0u8; 10]).is_err());
    }
}
