use thiserror::Error;

/// Errors surfaced by the text engine.
///
/// Structural errors (`IndexOutOfRange`, `InvalidRange`) indicate a caller
/// bug, such as a view holding stale coordinates, and are never recovered
/// locally.
/// A failed call applies no partial mutation. Negative search results
/// ("pattern not found", "no span here") are `None`/no-ops, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TextError {
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid range {start}..{end}")]
    InvalidRange { start: usize, end: usize },

    #[error("range {start}..{end} overlaps an active transform span")]
    OverlapConflict { start: usize, end: usize },
}

pub type Result<T> = std::result::Result<T, TextError>;

/// Checks `range` against a buffer of length `len`. Reversed ranges are
/// reported as `InvalidRange`, overshooting ends as `IndexOutOfRange`.
pub(crate) fn check_range(range: &std::ops::Range<usize>, len: usize) -> Result<()> {
    if range.end < range.start {
        return Err(TextError::InvalidRange {
            start: range.start,
            end: range.end,
        });
    }
    if range.end > len {
        return Err(TextError::IndexOutOfRange {
            index: range.end,
            len,
        });
    }
    Ok(())
}

pub(crate) fn check_index(index: usize, len: usize) -> Result<()> {
    if index > len {
        return Err(TextError::IndexOutOfRange { index, len });
    }
    Ok(())
}
