//! `WaveformPreview::from_blob` — spec.md §4.11's one-byte-per-column
//! waveform preview strip: a 5-bit height packed with a 3-bit
//! whiteness/color flag per the `beat-link` `WaveformPreview` convention.
//!
//! Grounded the same way as [`super::beatgrid`]: no teacher counterpart.

const HEIGHT_MASK: u8 = 0b0001_1111;
const HIGHLIGHT_BIT: u8 = 0b0010_0000;

/// A track's waveform preview strip: one byte per column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveformPreview {
    columns: Vec<u8>,
}

impl WaveformPreview {
    pub fn from_blob(data: &[u8]) -> WaveformPreview {
        WaveformPreview {
            columns: data.to_vec(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// The bar height (0..=31) of `column`, or `0` past the end of the strip.
    pub fn height(&self, column: usize) -> u8 {
        self.columns
            .get(column)
            .map(|b| b & HEIGHT_MASK)
            .unwrap_or(0)
    }

    /// Whether `column` is rendered in the highlighted (whiter) color the
    /// player uses near the current playback position.
    pub fn is_highlighted(&self, column: usize) -> bool {
        self.columns
            .get(column)
            .map(|b| b & HIGHLIGHT_BIT != 0)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpacks_height_and_highlight_bit() {
        let preview = WaveformPreview::from_blob(&[0b0010_1010, 0b0000_0101]);
        assert_eq!(preview.height(0), 0b0000_1010);
        assert!(preview.is_highlighted(0));
        assert_eq!(preview.height(1), 0b0000_0101);
        assert!(!preview.is_highlighted(1));
    }

    #[test]
    fn out_of_range_column_reads_as_flat_and_unhighlighted() {
        let preview = WaveformPreview::from_blob(&[0x00]);
        assert_eq!(preview.height(5), 0);
        assert!(!preview.is_highlighted(5));
    }
}
