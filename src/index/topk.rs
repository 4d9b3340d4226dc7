//! Bounded top-k selection with a deterministic tie-break.
//!
//! Rows are addressed by slot, and index structures lay their rows out in
//! ascending id order, so "lower slot wins a tie" is "lower id wins a tie".

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A scored slot. `Ord` puts the *worse* entry on top of a max-heap.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Scored {
    pub(crate) key: f32,
    pub(crate) slot: usize,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower key is worse; on equal keys the higher slot is worse
        other
            .key
            .total_cmp(&self.key)
            .then(self.slot.cmp(&other.slot))
    }
}

/// Keeps the best `k` entries seen so far.
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<Scored>,
}

impl TopK {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(4096)),
        }
    }

    /// Offers an entry; returns nothing, keeps at most `k`.
    #[inline]
    pub(crate) fn push(&mut self, key: f32, slot: usize) {
        if self.k == 0 {
            return;
        }
        let entry = Scored { key, slot };
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if let Some(worst) = self.heap.peek() {
            if entry < *worst {
                self.heap.pop();
                self.heap.push(entry);
            }
        }
    }

    /// Returns the kept entries best-first.
    pub(crate) fn into_sorted(self) -> Vec<Scored> {
        // Ascending under our Ord is best-first
        self.heap.into_sorted_vec()
    }
}
