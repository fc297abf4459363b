use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use uuid::Uuid;

use crate::models::Task;

/// A live queue entry. `seq` is the insertion sequence; restoring an entry
/// with its original `seq` puts it back at the front of its priority band.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub task: Task,
    pub weight: u8,
    pub seq: u64,
}

/// Heap slot. Tasks themselves live in the entry map; a slot whose
/// `(weight, seq)` no longer matches the map is a tombstone and gets
/// skipped on pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapSlot {
    weight: u8,
    seq: u64,
    id: Uuid,
}

impl Ord for HeapSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: highest weight first, then lowest sequence (FIFO)
        self.weight
            .cmp(&other.weight)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Indexed priority queue with lazy deletion.
///
/// Ordering key is `(weight desc, seq asc)`: strict priority, FIFO within
/// the same weight. `remove` tombstones instead of restructuring the heap;
/// stale slots are discarded when popped, and the heap is compacted once
/// tombstones dominate.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<HeapSlot>,
    entries: HashMap<Uuid, QueueEntry>,
    next_seq: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task. If the id is already queued the old entry is
    /// tombstoned first, so demote-and-requeue never duplicates delivery.
    pub fn push(&mut self, task: Task, weight: u8) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = task.id;
        self.entries.insert(id, QueueEntry { task, weight, seq });
        self.heap.push(HeapSlot { weight, seq, id });
        seq
    }

    /// Re-insert a previously popped entry, keeping its original sequence
    /// number so FIFO order within its weight band is preserved.
    pub fn restore(&mut self, entry: QueueEntry) {
        let slot = HeapSlot {
            weight: entry.weight,
            seq: entry.seq,
            id: entry.task.id,
        };
        self.entries.insert(entry.task.id, entry);
        self.heap.push(slot);
    }

    /// Pop the highest-priority live entry, skipping tombstones.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        while let Some(slot) = self.heap.pop() {
            let live = self
                .entries
                .get(&slot.id)
                .is_some_and(|e| e.seq == slot.seq && e.weight == slot.weight);
            if live {
                return self.entries.remove(&slot.id);
            }
        }
        None
    }

    /// Lazy removal by id; the heap slot stays behind as a tombstone.
    pub fn remove(&mut self, id: &Uuid) -> Option<Task> {
        let removed = self.entries.remove(id).map(|e| e.task);
        if removed.is_some() {
            self.maybe_compact();
        }
        removed
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    /// Live (non-tombstoned) entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rebuild the heap once tombstones outnumber live entries by a wide
    /// margin, bounding the cost of lazy deletion.
    fn maybe_compact(&mut self) {
        if self.heap.len() > 64 && self.heap.len() > self.entries.len() * 2 {
            let entries = &self.entries;
            let slots: Vec<HeapSlot> = self
                .heap
                .iter()
                .filter(|slot| {
                    entries
                        .get(&slot.id)
                        .is_some_and(|e| e.seq == slot.seq && e.weight == slot.weight)
                })
                .copied()
                .collect();
            self.heap = BinaryHeap::from(slots);
        }
    }
}
