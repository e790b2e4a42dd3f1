//! Binary min-heap driving the k-way point merge.
//!
//! Holds at most one live item per source, ordered by (user key ASC, trailer
//! DESC) so that for one user key the record with the newest data is at the
//! root. Hand-rolled rather than `std::collections::BinaryHeap` because the
//! ordering needs the store's external comparator, which `Ord` cannot carry,
//! and because the scan mutates the root's key in place and re-sifts instead
//! of popping and reinserting.

use base::{Comparator, InternalKey, LazyValue};

/// The heap's view of one source: the slot index it belongs to plus the
/// source's current key and value.
pub(crate) struct HeapItem {
    /// Index into the scan's source-slot array.
    pub slot: usize,
    pub key: InternalKey,
    pub value: LazyValue,
}

pub(crate) struct MergeHeap {
    items: Vec<HeapItem>,
}

impl MergeHeap {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            items: Vec::with_capacity(n),
        }
    }

    /// Adds an item without restoring heap order; call [`MergeHeap::init`]
    /// after the last push.
    pub fn push_unordered(&mut self, item: HeapItem) {
        self.items.push(item);
    }

    /// Heapifies in O(n).
    pub fn init(&mut self, cmp: &dyn Comparator) {
        let n = self.items.len();
        for i in (0..n / 2).rev() {
            self.sift_down(cmp, i, n);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The smallest item. Panics if empty; callers check first.
    pub fn root(&self) -> &HeapItem {
        &self.items[0]
    }

    pub fn root_mut(&mut self) -> &mut HeapItem {
        &mut self.items[0]
    }

    /// Restores order after the root's key/value were replaced in place.
    pub fn fix_root(&mut self, cmp: &dyn Comparator) {
        self.sift_down(cmp, 0, self.items.len());
    }

    /// Removes and returns the root.
    pub fn pop_root(&mut self, cmp: &dyn Comparator) -> HeapItem {
        let n = self.items.len() - 1;
        self.items.swap(0, n);
        let item = self.items.remove(n);
        if n > 0 {
            self.sift_down(cmp, 0, n);
        }
        item
    }

    fn less(&self, cmp: &dyn Comparator, i: usize, j: usize) -> bool {
        let (a, b) = (&self.items[i].key, &self.items[j].key);
        match cmp.compare(&a.user_key, &b.user_key) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            // Same user key: the newer record (higher trailer) sorts first.
            std::cmp::Ordering::Equal => a.trailer() > b.trailer(),
        }
    }

    fn sift_down(&mut self, cmp: &dyn Comparator, mut i: usize, n: usize) {
        loop {
            let left = 2 * i + 1;
            if left >= n {
                return;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && self.less(cmp, right, left) {
                child = right;
            }
            if !self.less(cmp, child, i) {
                return;
            }
            self.items.swap(i, child);
            i = child;
        }
    }
}
