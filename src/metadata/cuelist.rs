//! `CueList::from_blob` — spec.md §4.11's cue/loop-point blob layout:
//! 36-byte entries starting at offset 20.
//!
//! Grounded the same way as [`super::beatgrid`]: no teacher counterpart,
//! built from the `beat-link` `CueList` entry layout spec.md §4.11 names.

use super::le_u32_at;
use crate::error::{PdjError, Result};

const ENTRY_STRIDE: usize = 36;
const BASE_OFFSET: usize = 20;
const POSITION_OFFSET: usize = 12;
const LOOP_END_OFFSET: usize = 16;

/// A single cue point or loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CueEntry {
    pub position_ms: u32,
    /// `Some(end)` if this entry is a loop; `None` for a plain cue point.
    pub loop_end_ms: Option<u32>,
}

impl CueEntry {
    pub fn is_loop(&self) -> bool {
        self.loop_end_ms.is_some()
    }
}

/// A track's cue points and loops, decoded from a dbserver render-menu
/// `Blob` field (spec.md §4.11).
#[derive(Debug, Clone, PartialEq)]
pub struct CueList {
    entries: Vec<CueEntry>,
}

impl CueList {
    pub fn from_blob(data: &[u8]) -> Result<CueList> {
        if data.len() < BASE_OFFSET {
            return Err(PdjError::UnexpectedSlot(data.len() as u8));
        }
        let count = (data.len() - BASE_OFFSET) / ENTRY_STRIDE;

        let mut entries = Vec::with_capacity(count);
        for k in 0..count {
            let offset = BASE_OFFSET + k * ENTRY_STRIDE;
            let position_ms = le_u32_at(data, offset + POSITION_OFFSET)
                .ok_or(PdjError::UnexpectedSlot((offset + POSITION_OFFSET) as u8))?;
            let loop_end_raw = le_u32_at(data, offset + LOOP_END_OFFSET)
                .ok_or(PdjError::UnexpectedSlot((offset + LOOP_END_OFFSET) as u8))?;
            let loop_end_ms = if loop_end_raw == 0 {
                None
            } else {
                Some(loop_end_raw)
            };
            entries.push(CueEntry {
                position_ms,
                loop_end_ms,
            });
        }

        Ok(CueList { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, k: usize) -> Option<CueEntry> {
        self.entries.get(k).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CueEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blob(entries: &[(u32, u32)]) -> Vec<u8> {
        let mut blob = vec![0u8; BASE_OFFSET];
        for (position, loop_end) in entries {
            let mut entry = [0u8; ENTRY_STRIDE];
            entry[POSITION_OFFSET..POSITION_OFFSET + 4].copy_from_slice(&position.to_le_bytes());
            entry[LOOP_END_OFFSET..LOOP_END_OFFSET + 4].copy_from_slice(&loop_end.to_le_bytes());
            blob.extend_from_slice(&entry);
        }
        blob
    }

    #[test]
    fn distinguishes_cues_from_loops() {
        let blob = sample_blob(&[(1_000, 0), (5_000, 9_000)]);
        let cues = CueList::from_blob(&blob).unwrap();
        assert_eq!(cues.len(), 2);
        assert!(!cues.entry(0).unwrap().is_loop());
        assert_eq!(cues.entry(1).unwrap().position_ms, 5_000);
        assert_eq!(cues.entry(1).unwrap().loop_end_ms, Some(9_000));
    }

    #[test]
    fn empty_blob_yields_no_entries() {
        let cues = CueList::from_blob(&[0u8; BASE_OFFSET]).unwrap();
        assert!(cues.is_empty());
    }
}
