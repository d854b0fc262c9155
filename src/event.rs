//! Change notification for buffer mutations.
//!
//! Every successful `insert` or `delete` on a buffer produces exactly one
//! [`ChangeEvent`]. Listeners are notified synchronously, in registration
//! order, before the mutating call returns, so a listener always observes
//! the buffer in exactly the state described by the event.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::text::TextSource;

/// What kind of mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Delete,
}

/// A single buffer mutation.
///
/// Coordinate convention: for `Insert` the range is the span of the newly
/// inserted chars in post-edit coordinates; for `Delete` it is the span of
/// the removed chars in pre-edit coordinates. `end` is exclusive in both
/// cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub start: usize,
    pub end: usize,
}

impl ChangeEvent {
    pub fn insert(range: Range<usize>) -> Self {
        ChangeEvent {
            kind: ChangeKind::Insert,
            start: range.start,
            end: range.end,
        }
    }

    pub fn delete(range: Range<usize>) -> Self {
        ChangeEvent {
            kind: ChangeKind::Delete,
            start: range.start,
            end: range.end,
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// The damaged region in post-edit coordinates plus the signed length
    /// change, as consumed by the layout engine.
    pub(crate) fn layout_damage(&self) -> (Range<usize>, isize) {
        match self.kind {
            ChangeKind::Insert => (self.start..self.end, self.len() as isize),
            ChangeKind::Delete => (self.start..self.start, -(self.len() as isize)),
        }
    }
}

/// Synchronous observer of buffer mutations.
pub trait ChangeListener {
    /// Called once per mutation, after the buffer and its indexes have been
    /// updated. `text` is the post-edit buffer.
    fn on_text_change(&mut self, event: &ChangeEvent, text: &dyn TextSource);
}
