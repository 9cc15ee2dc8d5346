//! Pending-task queue for the pool
//!
//! Strict priority with FIFO order inside each priority tier. The queue is
//! not internally synchronized; the pool guards it with its state lock.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::task::TaskPriority;

struct Entry<T> {
    priority: TaskPriority,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // Max-heap: higher priority first, then lower sequence number first.
    fn cmp(
        &self,
        other: &Self,
    ) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority-aware task queue.
///
/// Ordered by (priority descending, enqueue order ascending).
pub struct PriorityTaskQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> PriorityTaskQueue<T> {
    /// Create a new priority task queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Push an item with the given priority.
    pub fn push(
        &mut self,
        item: T,
        priority: TaskPriority,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority,
            seq,
            item,
        });
    }

    /// Pop the highest priority, earliest enqueued item.
    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|entry| entry.item)
    }

    /// Peek at the item `pop` would return.
    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|entry| &entry.item)
    }

    /// Priority of the item `pop` would return.
    pub fn peek_priority(&self) -> Option<TaskPriority> {
        self.heap.peek().map(|entry| entry.priority)
    }

    /// Drop items from the front while `stale` holds for them.
    pub fn discard_front_while(
        &mut self,
        mut stale: impl FnMut(&T) -> bool,
    ) -> usize {
        let mut discarded = 0;
        while self.heap.peek().is_some_and(|entry| stale(&entry.item)) {
            self.heap.pop();
            discarded += 1;
        }
        discarded
    }

    /// Remove every item, in pop order.
    pub fn drain_ordered(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.heap.len());
        while let Some(item) = self.pop() {
            items.push(item);
        }
        items
    }

    /// Iterate queued items in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.heap.iter().map(|entry| &entry.item)
    }

    /// Get total number of queued items, stale ones included.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for PriorityTaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for PriorityTaskQueue<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PriorityTaskQueue")
            .field("len", &self.heap.len())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}
