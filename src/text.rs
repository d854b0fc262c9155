//! The read and mutate contracts shared by every text-holding type in the
//! engine.
//!
//! `ChunkStore`, `ChunkSnapshot` and `TransformLayer` all expose the same
//! read surface, so consumers (layout, cursor mapping, content scanners) are
//! written once against `TextSource` and do not care whether they are looking
//! at raw or transformed text.
//!
//! All offsets are in chars, not bytes.

use crate::error::Result;
use crate::event::ChangeEvent;
use std::ops::Range;

/// Read-only access to a sequence of chars.
pub trait TextSource {
    /// Number of chars.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The char at `index`, or `None` past the end.
    fn char_at(&self, index: usize) -> Option<char>;

    /// Materializes `range` as an owned string. Cost scales with the number
    /// of chunks touched, never with total length. Never mutates chunk
    /// layout.
    fn substring(&self, range: Range<usize>) -> Result<String>;

    /// Full materialization. Diagnostics and tests only, not the hot read
    /// path.
    fn build_string(&self) -> String;
}

/// A text source that accepts edits.
///
/// Single-writer discipline: exactly one thread may call the mutating
/// methods at a time. Concurrent readers must hold a snapshot instead (see
/// `ChunkStore::snapshot`).
pub trait MutableText: TextSource {
    /// Inserts `text` before the char at `pos` (`pos == len` appends).
    /// Returns the emitted [`ChangeEvent`] in post-edit coordinates.
    fn insert(&mut self, pos: usize, text: &str) -> Result<ChangeEvent>;

    /// Deletes `range`. Returns the emitted [`ChangeEvent`] in pre-edit
    /// coordinates.
    fn delete(&mut self, range: Range<usize>) -> Result<ChangeEvent>;
}
