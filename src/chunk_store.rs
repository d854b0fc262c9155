//! Chunked character storage.
//!
//! Text is held as an ordered sequence of reference-counted chunks, each a
//! contiguous run of chars capped around a configurable size. Per-chunk char
//! and line-break counts are aggregated in Fenwick trees so offset and line
//! resolution are O(log chunks); edits touch only the chunks they land in.
//!
//! All addressing is in chars. Byte positions never appear in the public
//! API; chunks convert at their own boundaries.
//!
//! Sharing model: chunks are `Arc`-shared and copy-on-write. `snapshot`
//! clones the chunk sequence (cheap, pointer copies) into an immutable
//! [`ChunkSnapshot`] that concurrent readers can hold while the store keeps
//! mutating.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

use crate::error::{check_index, check_range, Result, TextError};
use crate::event::{ChangeEvent, ChangeListener};
use crate::fenwick::FenwickTree;
use crate::layout::{CharMeasurer, LayoutEngine, LayoutText};
use crate::line_index::LineIndex;
use crate::text::{MutableText, TextSource};

/// Storage tuning for a [`ChunkStore`].
///
/// `chunk_size` is the soft cap on chars per chunk. A chunk may transiently
/// hold up to twice that before a split is triggered; merges kick in when a
/// chunk falls under half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub chunk_size: usize,
}

impl ChunkConfig {
    pub const fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be positive");
        ChunkConfig { chunk_size }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        ChunkConfig::new(1024)
    }
}

/// One contiguous run of text plus its cached counts.
#[derive(Debug, Clone)]
pub(crate) struct Chunk {
    text: String,
    chars: usize,
    breaks: usize,
}

impl Chunk {
    fn new(text: String) -> Self {
        let chars = text.chars().count();
        let breaks = count_breaks(&text);
        Chunk { text, chars, breaks }
    }

    /// Byte position of char `char_off` (`char_off == chars` maps to the
    /// end of the chunk).
    fn byte_of(&self, char_off: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_off)
            .map_or(self.text.len(), |(b, _)| b)
    }

    fn splice(&mut self, char_off: usize, insert: &str) {
        let at = self.byte_of(char_off);
        self.text.insert_str(at, insert);
        self.chars += insert.chars().count();
        self.breaks += count_breaks(insert);
    }

    fn remove_range(&mut self, chars: Range<usize>) {
        let b0 = self.byte_of(chars.start);
        let b1 = self.byte_of(chars.end);
        self.breaks -= count_breaks(&self.text[b0..b1]);
        self.chars -= chars.len();
        self.text.drain(b0..b1);
    }
}

fn count_breaks(s: &str) -> usize {
    s.bytes().filter(|&b| b == b'\n').count()
}

/// Splits `text` into chunks of at most `chunk_size` chars.
fn chunk_text(text: &str, chunk_size: usize) -> Vec<Arc<Chunk>> {
    let mut out = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let split = rest
            .char_indices()
            .nth(chunk_size)
            .map_or(rest.len(), |(b, _)| b);
        let (head, tail) = rest.split_at(split);
        out.push(Arc::new(Chunk::new(head.to_string())));
        rest = tail;
    }
    out
}

/// The mutable text buffer.
///
/// Owns the chunk sequence, the char and line indexes, the registered
/// change listeners and the optionally attached layout engine. Single
/// writer; see [`ChunkStore::snapshot`] for concurrent reads.
pub struct ChunkStore {
    chunks: Vec<Arc<Chunk>>,
    len: usize,
    config: ChunkConfig,
    chars_index: FenwickTree,
    lines: LineIndex,
    listeners: Vec<Box<dyn ChangeListener>>,
    layout: Option<LayoutEngine>,
}

impl Default for ChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::with_config(ChunkConfig::default())
    }

    pub fn with_config(config: ChunkConfig) -> Self {
        ChunkStore {
            chunks: Vec::new(),
            len: 0,
            config,
            chars_index: FenwickTree::new(0),
            lines: LineIndex::default(),
            listeners: Vec::new(),
            layout: None,
        }
    }

    pub fn from_text(text: &str, config: ChunkConfig) -> Self {
        let mut store = Self::with_config(config);
        store.chunks = chunk_text(text, config.chunk_size);
        store.len = store.chunks.iter().map(|c| c.chars).sum();
        store.rebuild_indexes();
        store
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn add_listener(&mut self, listener: Box<dyn ChangeListener>) {
        self.listeners.push(listener);
    }

    /// Immutable point-in-time view sharing the current chunks. O(chunks).
    pub fn snapshot(&self) -> ChunkSnapshot {
        ChunkSnapshot {
            chunks: self.chunks.clone(),
            len: self.len,
        }
    }

    /// Attaches a wrap layout and computes it for the current content.
    /// Subsequent edits update the layout incrementally.
    pub fn set_layouter(&mut self, measurer: Box<dyn CharMeasurer>, content_width: u32) {
        let mut layout = LayoutEngine::new(measurer, content_width);
        layout.layout_all(self);
        self.layout = Some(layout);
    }

    pub fn layout(&self) -> Option<&LayoutEngine> {
        self.layout.as_ref()
    }

    pub fn clear_layouter(&mut self) {
        self.layout = None;
    }

    // --- line queries ---

    /// Number of lines; always at least 1 (the empty buffer has one empty
    /// line).
    pub fn line_count(&self) -> usize {
        self.lines.total_breaks() + 1
    }

    /// 0-based line number of the line containing `offset`. `offset == len`
    /// resolves to the last line.
    pub fn line_of_offset(&self, offset: usize) -> Result<usize> {
        check_index(offset, self.len)?;
        if self.chunks.is_empty() {
            return Ok(0);
        }
        let (i, off) = self.locate(offset);
        let chunk = &self.chunks[i];
        let before = count_breaks(&chunk.text[..chunk.byte_of(off)]);
        Ok(self.lines.breaks_before(i) + before)
    }

    /// Char offset of the first char of 0-based `line`.
    pub fn offset_of_line(&self, line: usize) -> Result<usize> {
        if line == 0 {
            return Ok(0);
        }
        let breaks = self.lines.total_breaks();
        if line > breaks {
            return Err(TextError::IndexOutOfRange {
                index: line,
                len: breaks + 1,
            });
        }
        let (i, rank) = self.lines.find_break(line - 1);
        let chunk = &self.chunks[i];
        let mut seen = 0;
        for (char_idx, ch) in chunk.text.chars().enumerate() {
            if ch == '\n' {
                if seen == rank {
                    return Ok(self.chars_index.prefix(i) + char_idx + 1);
                }
                seen += 1;
            }
        }
        // Cached break counts guarantee the rank-th break exists in chunk i.
        Err(TextError::IndexOutOfRange {
            index: line,
            len: breaks + 1,
        })
    }

    // --- internals ---

    /// Chunk index and in-chunk char offset for a global offset.
    /// `offset == len` resolves to the end of the last chunk.
    fn locate(&self, offset: usize) -> (usize, usize) {
        if self.chunks.is_empty() {
            return (0, 0);
        }
        if offset >= self.len {
            let last = self.chunks.len() - 1;
            return (last, self.chunks[last].chars);
        }
        self.chars_index.find(offset)
    }

    fn rebuild_indexes(&mut self) {
        let counts: Vec<usize> = self.chunks.iter().map(|c| c.chars).collect();
        self.chars_index = FenwickTree::from_counts(&counts);
        self.lines
            .rebuild(self.chunks.iter().map(|c| c.breaks).collect());
    }

    /// Merge sweep over `[from, until]`: adjacent chunks where either side
    /// fell under half the soft cap are coalesced while the pair still fits
    /// in one chunk.
    fn merge_window(&mut self, mut from: usize, mut until: usize) {
        let half = self.config.chunk_size / 2;
        while from + 1 < self.chunks.len() && from <= until {
            let a = self.chunks[from].chars;
            let b = self.chunks[from + 1].chars;
            if (a < half || b < half) && a + b <= self.config.chunk_size {
                let right = self.chunks.remove(from + 1);
                let left = Arc::make_mut(&mut self.chunks[from]);
                left.text.push_str(&right.text);
                left.chars += right.chars;
                left.breaks += right.breaks;
                until = until.saturating_sub(1);
                debug!(chunk = from, chars = left.chars, "merged adjacent chunks");
            } else {
                from += 1;
            }
        }
    }

    /// Incremental layout update plus listener fan-out, after indexes are
    /// consistent. Listeners registered during notification are appended
    /// and will see the next event.
    fn after_edit(&mut self, event: &ChangeEvent) {
        debug_assert_eq!(self.chars_index.total(), self.len);
        if let Some(mut layout) = self.layout.take() {
            let (dirty, delta) = event.layout_damage();
            layout.apply_edit(self, dirty, delta);
            self.layout = Some(layout);
        }
        if !self.listeners.is_empty() {
            let mut listeners = std::mem::take(&mut self.listeners);
            for listener in listeners.iter_mut() {
                listener.on_text_change(event, self);
            }
            listeners.append(&mut self.listeners);
            self.listeners = listeners;
        }
    }
}

impl TextSource for ChunkStore {
    fn len(&self) -> usize {
        self.len
    }

    fn char_at(&self, index: usize) -> Option<char> {
        if index >= self.len {
            return None;
        }
        let (i, off) = self.locate(index);
        let chunk = &self.chunks[i];
        chunk.text[chunk.byte_of(off)..].chars().next()
    }

    fn substring(&self, range: Range<usize>) -> Result<String> {
        check_range(&range, self.len)?;
        let mut out = String::with_capacity(range.len());
        if range.is_empty() {
            return Ok(out);
        }
        let (mut i, mut local) = self.locate(range.start);
        let mut remaining = range.len();
        while remaining > 0 {
            let chunk = &self.chunks[i];
            let take = (chunk.chars - local).min(remaining);
            let b0 = chunk.byte_of(local);
            let b1 = chunk.byte_of(local + take);
            out.push_str(&chunk.text[b0..b1]);
            remaining -= take;
            local = 0;
            i += 1;
        }
        Ok(out)
    }

    fn build_string(&self) -> String {
        self.chunks.iter().map(|c| c.text.as_str()).collect()
    }
}

impl MutableText for ChunkStore {
    fn insert(&mut self, pos: usize, text: &str) -> Result<ChangeEvent> {
        check_index(pos, self.len)?;
        let ins_chars = text.chars().count();
        if ins_chars == 0 {
            return Ok(ChangeEvent::insert(pos..pos));
        }
        if self.chunks.is_empty() {
            self.chunks = chunk_text(text, self.config.chunk_size);
            self.len = ins_chars;
            self.rebuild_indexes();
        } else {
            let (i, off) = self.locate(pos);
            if self.chunks[i].chars + ins_chars <= 2 * self.config.chunk_size {
                // In-place splice: point updates only, no structural change.
                let chunk = Arc::make_mut(&mut self.chunks[i]);
                chunk.splice(off, text);
                let breaks = chunk.breaks;
                self.chars_index.add(i, ins_chars as isize);
                self.lines.set(i, breaks);
                self.len += ins_chars;
            } else {
                // Split the target chunk around the insertion point and
                // chunk the incoming text on the way in.
                let old = self.chunks.remove(i);
                let byte_off = old.byte_of(off);
                let mut pieces = chunk_text(&old.text[..byte_off], self.config.chunk_size);
                pieces.extend(chunk_text(text, self.config.chunk_size));
                pieces.extend(chunk_text(&old.text[byte_off..], self.config.chunk_size));
                debug!(chunk = i, pieces = pieces.len(), "split chunk on insert");
                for (k, piece) in pieces.into_iter().enumerate() {
                    self.chunks.insert(i + k, piece);
                }
                self.len += ins_chars;
                self.rebuild_indexes();
            }
        }
        let event = ChangeEvent::insert(pos..pos + ins_chars);
        self.after_edit(&event);
        Ok(event)
    }

    fn delete(&mut self, range: Range<usize>) -> Result<ChangeEvent> {
        check_range(&range, self.len)?;
        if range.is_empty() {
            return Ok(ChangeEvent::delete(range));
        }
        let (first, local) = self.locate(range.start);
        let chunk_len = self.chunks[first].chars;
        let chunk_start = range.start - local;
        let half = self.config.chunk_size / 2;
        if range.end <= chunk_start + chunk_len && chunk_len - range.len() >= half.max(1) {
            // Whole range inside one chunk that stays at or above half the
            // soft cap: point updates only, no structural change.
            let chunk = Arc::make_mut(&mut self.chunks[first]);
            chunk.remove_range(local..local + range.len());
            let breaks = chunk.breaks;
            self.chars_index.add(first, -(range.len() as isize));
            self.lines.set(first, breaks);
            self.len -= range.len();
            let event = ChangeEvent::delete(range);
            self.after_edit(&event);
            return Ok(event);
        }
        let mut partial: Vec<(usize, Range<usize>)> = Vec::new();
        let mut full: Vec<usize> = Vec::new();
        let mut chunk_pos = self.chars_index.prefix(first);
        let mut i = first;
        while i < self.chunks.len() && chunk_pos < range.end {
            let c_len = self.chunks[i].chars;
            let lo = range.start.saturating_sub(chunk_pos).min(c_len);
            let hi = (range.end - chunk_pos).min(c_len);
            if lo == 0 && hi == c_len {
                full.push(i);
            } else if lo < hi {
                partial.push((i, lo..hi));
            }
            chunk_pos += c_len;
            i += 1;
        }
        for (i, r) in partial {
            Arc::make_mut(&mut self.chunks[i]).remove_range(r);
        }
        for &i in full.iter().rev() {
            self.chunks.remove(i);
        }
        self.len -= range.len();
        self.merge_window(first.saturating_sub(1), first + 2);
        self.rebuild_indexes();
        let event = ChangeEvent::delete(range);
        self.after_edit(&event);
        Ok(event)
    }
}

impl LayoutText for ChunkStore {}

/// Immutable point-in-time view of a [`ChunkStore`].
///
/// Shares chunk storage with the store it came from; later edits to the
/// store copy-on-write their chunks and never show through. Reads locate
/// linearly over the chunk list, which is fine for the cold paths snapshots
/// serve.
#[derive(Clone)]
pub struct ChunkSnapshot {
    chunks: Vec<Arc<Chunk>>,
    len: usize,
}

impl ChunkSnapshot {
    fn locate(&self, offset: usize) -> Option<(usize, usize)> {
        let mut pos = 0;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if offset < pos + chunk.chars {
                return Some((i, offset - pos));
            }
            pos += chunk.chars;
        }
        None
    }
}

impl TextSource for ChunkSnapshot {
    fn len(&self) -> usize {
        self.len
    }

    fn char_at(&self, index: usize) -> Option<char> {
        let (i, off) = self.locate(index)?;
        let chunk = &self.chunks[i];
        chunk.text[chunk.byte_of(off)..].chars().next()
    }

    fn substring(&self, range: Range<usize>) -> Result<String> {
        check_range(&range, self.len)?;
        let mut out = String::with_capacity(range.len());
        if range.is_empty() {
            return Ok(out);
        }
        let (mut i, mut local) = match self.locate(range.start) {
            Some(found) => found,
            None => (self.chunks.len(), 0),
        };
        let mut remaining = range.len();
        while remaining > 0 {
            let chunk = &self.chunks[i];
            let take = (chunk.chars - local).min(remaining);
            let b0 = chunk.byte_of(local);
            let b1 = chunk.byte_of(local + take);
            out.push_str(&chunk.text[b0..b1]);
            remaining -= take;
            local = 0;
            i += 1;
        }
        Ok(out)
    }

    fn build_string(&self) -> String {
        self.chunks.iter().map(|c| c.text.as_str()).collect()
    }
}

impl LayoutText for ChunkSnapshot {}
