//! Incremental wrap layout.
//!
//! Maps text to visual rows for a fixed content width. Rows break at hard
//! `'\n'` boundaries and at soft wrap points where the next unit would
//! overflow the width budget. A unit is normally one char; text sources can
//! report atomic ranges (see [`LayoutText::atom_at`]) that are measured and
//! placed as a single indivisible token.
//!
//! The scan is greedy and memoryless at row starts: a row's extent depends
//! only on its start offset and the text after it. [`LayoutEngine::apply_edit`]
//! exploits that to re-lay only a damaged window, shifting the untouched
//! tail rows and splicing them back as soon as a recomputed row boundary
//! lands on a shifted old one. The result is always identical to a
//! from-scratch [`LayoutEngine::layout_all`].

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::text::TextSource;

/// Per-char advance widths, in whatever unit the caller renders in.
pub trait CharMeasurer {
    fn width(&self, ch: char) -> u32;
}

/// Every char advances by the same width. The monospace case.
#[derive(Debug, Clone, Copy)]
pub struct FixedWidthMeasurer(pub u32);

impl CharMeasurer for FixedWidthMeasurer {
    fn width(&self, _ch: char) -> u32 {
        self.0
    }
}

/// East-Asian-aware cell widths: wide glyphs count 2, combining marks 0.
#[derive(Debug, Clone, Copy)]
pub struct UnicodeWidthMeasurer;

impl CharMeasurer for UnicodeWidthMeasurer {
    fn width(&self, ch: char) -> u32 {
        use unicode_width::UnicodeWidthChar;
        ch.width().unwrap_or(0) as u32
    }
}

/// A text source the layout engine can scan.
///
/// `atom_at` reports an indivisible range covering `offset`, if any. Atoms
/// never start mid-unit in practice because row starts are only ever placed
/// at unit boundaries. Line break chars inside an atom are measured like
/// any other glyph and do not terminate rows; the atom is opaque.
pub trait LayoutText: TextSource {
    fn atom_at(&self, _offset: usize) -> Option<Range<usize>> {
        None
    }
}

/// One visual row: `start..end` in char offsets (the terminating `'\n'`,
/// if any, is included) plus the summed advance width of its glyphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRow {
    pub start: usize,
    pub end: usize,
    pub width: u32,
}

const CURSOR_WINDOW: usize = 256;

/// Buffered char reader over a `LayoutText`, pulling fixed-size substring
/// windows so the scan does not pay a per-char lookup.
struct CharCursor<'a> {
    text: &'a dyn LayoutText,
    buf: Vec<char>,
    buf_start: usize,
    pos: usize,
}

impl<'a> CharCursor<'a> {
    fn new(text: &'a dyn LayoutText, pos: usize) -> Self {
        CharCursor {
            text,
            buf: Vec::new(),
            buf_start: 0,
            pos,
        }
    }

    fn peek(&mut self) -> Option<char> {
        if self.pos >= self.text.len() {
            return None;
        }
        if self.pos < self.buf_start || self.pos >= self.buf_start + self.buf.len() {
            let end = (self.pos + CURSOR_WINDOW).min(self.text.len());
            let window = self.text.substring(self.pos..end).ok()?;
            self.buf = window.chars().collect();
            self.buf_start = self.pos;
        }
        self.buf.get(self.pos - self.buf_start).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }
}

/// Greedy row generator from an arbitrary row-start offset.
struct RowScanner<'a> {
    text: &'a dyn LayoutText,
    measurer: &'a dyn CharMeasurer,
    content_width: u32,
    cursor: CharCursor<'a>,
    pos: usize,
    finished: bool,
}

impl<'a> RowScanner<'a> {
    fn new(
        text: &'a dyn LayoutText,
        measurer: &'a dyn CharMeasurer,
        content_width: u32,
        start: usize,
    ) -> Self {
        RowScanner {
            text,
            measurer,
            content_width,
            cursor: CharCursor::new(text, start),
            pos: start,
            finished: false,
        }
    }

    fn finished(&self) -> bool {
        self.finished
    }

    /// The next row. The final row runs to the end of text and may be empty
    /// (empty text, or text ending in `'\n'`).
    fn next_row(&mut self) -> Option<LayoutRow> {
        if self.finished {
            return None;
        }
        let len = self.text.len();
        let start = self.pos;
        let mut width: u32 = 0;
        loop {
            if self.pos >= len {
                self.finished = true;
                return Some(LayoutRow {
                    start,
                    end: len,
                    width,
                });
            }
            if let Some(atom) = self.atom_starting_here() {
                let atom_width = self.measure_range(atom.clone());
                if width > 0 && width.saturating_add(atom_width) > self.content_width {
                    // Whole unit moves to the next row.
                    return Some(LayoutRow {
                        start,
                        end: self.pos,
                        width,
                    });
                }
                width = width.saturating_add(atom_width);
                self.pos = atom.end;
                self.cursor.seek(self.pos);
            } else {
                let ch = match self.cursor.peek() {
                    Some(ch) => ch,
                    None => {
                        self.finished = true;
                        return Some(LayoutRow {
                            start,
                            end: len,
                            width,
                        });
                    }
                };
                if ch == '\n' {
                    self.pos += 1;
                    self.cursor.advance();
                    return Some(LayoutRow {
                        start,
                        end: self.pos,
                        width,
                    });
                }
                let w = self.measurer.width(ch);
                if width > 0 && width.saturating_add(w) > self.content_width {
                    return Some(LayoutRow {
                        start,
                        end: self.pos,
                        width,
                    });
                }
                width = width.saturating_add(w);
                self.pos += 1;
                self.cursor.advance();
            }
        }
    }

    fn atom_starting_here(&self) -> Option<Range<usize>> {
        let atom = self.text.atom_at(self.pos)?;
        (atom.start == self.pos && atom.end > atom.start).then_some(atom)
    }

    fn measure_range(&self, range: Range<usize>) -> u32 {
        match self.text.substring(range) {
            Ok(s) => s.chars().map(|c| self.measurer.width(c)).sum(),
            Err(_) => 0,
        }
    }
}

fn shift(x: usize, delta: isize) -> usize {
    (x as isize + delta) as usize
}

/// Maintains the row list for one text source.
pub struct LayoutEngine {
    measurer: Box<dyn CharMeasurer>,
    content_width: u32,
    rows: Vec<LayoutRow>,
}

impl LayoutEngine {
    pub fn new(measurer: Box<dyn CharMeasurer>, content_width: u32) -> Self {
        LayoutEngine {
            measurer,
            content_width,
            rows: Vec::new(),
        }
    }

    pub fn content_width(&self) -> u32 {
        self.content_width
    }

    /// Full from-scratch layout. Rows cover `0..len` contiguously; even
    /// empty text yields one empty row.
    pub fn layout_all(&mut self, text: &dyn LayoutText) {
        let mut scanner = RowScanner::new(text, self.measurer.as_ref(), self.content_width, 0);
        let mut rows = Vec::new();
        while let Some(row) = scanner.next_row() {
            rows.push(row);
        }
        self.rows = rows;
    }

    /// Incremental update after one edit. `text` is the post-edit source,
    /// `dirty` the damaged range in post-edit coordinates and `delta` the
    /// signed length change (so the pre-edit damage ended at
    /// `dirty.end - delta`).
    ///
    /// Rows before the damage are kept as-is. Re-layout restarts one row
    /// before the row containing `dirty.start` (the previous row's soft
    /// boundary can move when the unit just past it changes) and runs until
    /// a recomputed boundary coincides with a shifted old row start beyond
    /// the damage, at which point the remaining old rows are shifted by
    /// `delta` and reattached.
    pub fn apply_edit(&mut self, text: &dyn LayoutText, dirty: Range<usize>, delta: isize) {
        if self.rows.is_empty() {
            self.layout_all(text);
            return;
        }
        let pre_end = shift(dirty.end, -delta);
        let r = self
            .rows
            .partition_point(|row| row.end <= dirty.start)
            .min(self.rows.len() - 1);
        let r0 = r.saturating_sub(1);
        let restart = self.rows[r0].start;

        let mut scanner = RowScanner::new(text, self.measurer.as_ref(), self.content_width, restart);
        let mut new_rows: Vec<LayoutRow> = Vec::new();
        // Old rows eligible for resync: strictly after the restart row and
        // entirely past the pre-edit damage, so their content is unchanged.
        let mut j = self
            .rows
            .partition_point(|row| row.start < pre_end)
            .max(r0 + 1);
        let mut matched: Option<usize> = None;
        while let Some(row) = scanner.next_row() {
            new_rows.push(row);
            if scanner.finished() {
                break;
            }
            let boundary = row.end;
            if boundary >= dirty.end {
                while j < self.rows.len() && shift(self.rows[j].start, delta) < boundary {
                    j += 1;
                }
                if j < self.rows.len() && shift(self.rows[j].start, delta) == boundary {
                    matched = Some(j);
                    break;
                }
            }
        }

        let mut result: Vec<LayoutRow> = Vec::with_capacity(self.rows.len());
        result.extend_from_slice(&self.rows[..r0]);
        result.append(&mut new_rows);
        if let Some(j) = matched {
            result.extend(self.rows[j..].iter().map(|row| LayoutRow {
                start: shift(row.start, delta),
                end: shift(row.end, delta),
                width: row.width,
            }));
        }
        self.rows = result;
        debug_assert!(self.rows.last().is_some_and(|row| row.end == text.len()));
    }

    pub fn rows(&self) -> &[LayoutRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, index: usize) -> Option<LayoutRow> {
        self.rows.get(index).copied()
    }

    /// Index of the row containing `offset`. An offset sitting on a row
    /// boundary belongs to the following row; `offset == len` resolves to
    /// the last row. `None` past the end.
    pub fn row_at(&self, offset: usize) -> Option<usize> {
        let last = self.rows.last()?;
        if offset > last.end {
            return None;
        }
        Some(
            self.rows
                .partition_point(|row| row.end <= offset)
                .min(self.rows.len() - 1),
        )
    }
}
