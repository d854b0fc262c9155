//! Line break bookkeeping over the chunk sequence.
//!
//! Each chunk caches how many `'\n'` chars it holds; this index aggregates
//! those counts in a Fenwick tree so line queries resolve to a chunk in
//! O(log n) and only scan that one chunk's text. In-place chunk edits are
//! point updates; structural changes (split, merge, chunk insertion or
//! removal) rebuild from the cached counts in O(chunks) without rescanning
//! any text.

use crate::fenwick::FenwickTree;

#[derive(Debug, Clone, Default)]
pub(crate) struct LineIndex {
    counts: Vec<usize>,
    fenwick: FenwickTree,
}

impl LineIndex {
    pub fn rebuild(&mut self, counts: Vec<usize>) {
        self.fenwick = FenwickTree::from_counts(&counts);
        self.counts = counts;
    }

    /// Point update after an in-place edit to chunk `i`.
    pub fn set(&mut self, i: usize, count: usize) {
        let delta = count as isize - self.counts[i] as isize;
        if delta != 0 {
            self.fenwick.add(i, delta);
            self.counts[i] = count;
        }
    }

    /// Line breaks in chunks `0..i`.
    pub fn breaks_before(&self, i: usize) -> usize {
        self.fenwick.prefix(i)
    }

    pub fn total_breaks(&self) -> usize {
        self.fenwick.total()
    }

    /// Chunk holding the `k`-th break (0-based) and the break's rank within
    /// that chunk. `k` must be `< total_breaks()`.
    pub fn find_break(&self, k: usize) -> (usize, usize) {
        self.fenwick.find(k)
    }
}
