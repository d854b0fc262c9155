//! Binary indexed tree over per-chunk counts.
//!
//! Backs both the char index (chunk sizes) and the line index (per-chunk
//! line break counts). Point updates and prefix sums are O(log n); the
//! descent in [`FenwickTree::find`] resolves a global rank to a chunk in a
//! single O(log n) pass without materializing prefix sums.

#[derive(Debug, Clone, Default)]
pub(crate) struct FenwickTree {
    // 1-based internal layout, tree[0] unused.
    tree: Vec<usize>,
    n: usize,
}

impl FenwickTree {
    pub fn new(n: usize) -> Self {
        FenwickTree {
            tree: vec![0; n + 1],
            n,
        }
    }

    /// O(n) construction from raw counts.
    pub fn from_counts(counts: &[usize]) -> Self {
        let n = counts.len();
        let mut tree = vec![0usize; n + 1];
        for i in 1..=n {
            tree[i] += counts[i - 1];
            let parent = i + (i & i.wrapping_neg());
            if parent <= n {
                tree[parent] += tree[i];
            }
        }
        FenwickTree { tree, n }
    }

    /// Adds `delta` to the count at position `i` (0-based).
    pub fn add(&mut self, i: usize, delta: isize) {
        debug_assert!(i < self.n);
        let mut i = i + 1;
        while i <= self.n {
            self.tree[i] = (self.tree[i] as isize + delta) as usize;
            i += i & i.wrapping_neg();
        }
    }

    /// Sum of the first `i` counts (positions `0..i`).
    pub fn prefix(&self, i: usize) -> usize {
        debug_assert!(i <= self.n);
        let mut i = i;
        let mut sum = 0;
        while i > 0 {
            sum += self.tree[i];
            i -= i & i.wrapping_neg();
        }
        sum
    }

    pub fn total(&self) -> usize {
        self.prefix(self.n)
    }

    /// Finds the position holding global rank `k`: the smallest index `i`
    /// such that `prefix(i + 1) > k`. Returns `(i, k - prefix(i))`, i.e. the
    /// position and the remaining rank inside it. `k` must be `< total()`.
    pub fn find(&self, k: usize) -> (usize, usize) {
        debug_assert!(k < self.total());
        let mut pos = 0usize;
        let mut rem = k;
        let mut step = self.n.next_power_of_two();
        while step > 0 {
            let next = pos + step;
            if next <= self.n && self.tree[next] <= rem {
                rem -= self.tree[next];
                pos = next;
            }
            step >>= 1;
        }
        (pos, rem)
    }
}
