//! Indexed binary max-heap of dispatch items.
//!
//! Ordering: higher `priority` first; on a tie, earlier `next_eligible` first;
//! on a further tie, lexicographically smaller handle first so the order is
//! total. A handle -> slot index makes `reprioritize` O(log n) and keeps
//! handles unique.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::domain::DispatchItem;
use crate::error::{FollowError, Result};

/// Compare two items by dispatch order. `Greater` means `a` goes first.
pub fn dispatch_order(a: &DispatchItem, b: &DispatchItem) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| b.next_eligible.cmp(&a.next_eligible))
        .then_with(|| b.account.handle.cmp(&a.account.handle))
}

/// Priority queue of pending follow actions, at most one per handle.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: Vec<DispatchItem>,
    index: HashMap<String, usize>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.index.contains_key(handle)
    }

    /// Look up a queued item by handle.
    pub fn get(&self, handle: &str) -> Option<&DispatchItem> {
        self.index.get(handle).map(|&i| &self.heap[i])
    }

    /// Insert an item. Pushing a handle that is already queued is an error.
    pub fn push(&mut self, mut item: DispatchItem) -> Result<()> {
        if self.index.contains_key(item.handle()) {
            return Err(FollowError::DuplicateHandle(item.account.handle.clone()));
        }
        let slot = self.heap.len();
        item.position = slot;
        self.index.insert(item.account.handle.clone(), slot);
        self.heap.push(item);
        self.sift_up(slot);
        Ok(())
    }

    /// The item that would be popped next.
    pub fn peek(&self) -> Option<&DispatchItem> {
        self.heap.first()
    }

    /// Remove and return the item that should be dispatched next.
    pub fn pop(&mut self) -> Option<DispatchItem> {
        self.remove_at(0)
    }

    /// Change a queued item's priority and eligible time in place.
    pub fn reprioritize(&mut self, handle: &str, priority: u8, next_eligible: DateTime<Utc>) -> Result<()> {
        let slot = *self
            .index
            .get(handle)
            .ok_or_else(|| FollowError::NotQueued(handle.to_string()))?;
        {
            let item = &mut self.heap[slot];
            item.priority = priority;
            item.next_eligible = next_eligible;
        }
        self.fix(slot);
        Ok(())
    }

    /// Items sorted in dispatch order.
    pub fn sorted(&self) -> Vec<&DispatchItem> {
        let mut items: Vec<&DispatchItem> = self.heap.iter().collect();
        items.sort_by(|a, b| dispatch_order(b, a));
        items
    }

    fn remove_at(&mut self, slot: usize) -> Option<DispatchItem> {
        let last = self.heap.len().checked_sub(1)?;
        self.swap(slot, last);
        let mut item = self.heap.pop()?;
        self.index.remove(item.handle());
        item.position = usize::MAX;
        if slot < self.heap.len() {
            self.fix(slot);
        }
        Some(item)
    }

    fn fix(&mut self, slot: usize) {
        if !self.sift_up(slot) {
            self.sift_down(slot);
        }
    }

    fn outranks(&self, a: usize, b: usize) -> bool {
        dispatch_order(&self.heap[a], &self.heap[b]) == Ordering::Greater
    }

    /// Returns true if the item moved.
    fn sift_up(&mut self, mut slot: usize) -> bool {
        let start = slot;
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if !self.outranks(slot, parent) {
                break;
            }
            self.swap(slot, parent);
            slot = parent;
        }
        slot != start
    }

    fn sift_down(&mut self, mut slot: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * slot + 1;
            let right = left + 1;
            let mut best = slot;
            if left < len && self.outranks(left, best) {
                best = left;
            }
            if right < len && self.outranks(right, best) {
                best = right;
            }
            if best == slot {
                break;
            }
            self.swap(slot, best);
            slot = best;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.heap[a].position = a;
        self.heap[b].position = b;
        self.index.insert(self.heap[a].account.handle.clone(), a);
        self.index.insert(self.heap[b].account.handle.clone(), b);
    }
}
