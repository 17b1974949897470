use std::collections::VecDeque;

/// A bucketed priority queue
///
/// Items live in `priority_range` FIFO buckets. Lower bucket indexes are served
/// first, and items within one bucket come out in the order they went in.
/// Priorities outside `[0, priority_range - 1]` are clamped into the last
/// (lowest priority) bucket rather than rejected.
#[derive(Debug)]
pub struct PriorityQueue<T> {
    slots: Vec<VecDeque<T>>,
    counter: usize,
}

impl<T> PriorityQueue<T> {
    /// Creates a queue with `priority_range` buckets (at least one)
    pub fn new(priority_range: usize) -> Self {
        let size = priority_range.max(1);
        Self {
            slots: (0..size).map(|_| VecDeque::new()).collect(),
            counter: 0,
        }
    }

    /// Appends `item` to the bucket for `priority`
    pub fn enqueue(&mut self, item: T, priority: i64) {
        let last = self.slots.len() - 1;
        let slot = if priority < 0 || priority as u64 > last as u64 {
            last
        } else {
            priority as usize
        };

        self.slots[slot].push_back(item);
        self.counter += 1;
    }

    /// Removes the oldest item from the lowest occupied bucket
    ///
    /// Returns `None` when every bucket is empty.
    pub fn dequeue(&mut self) -> Option<T> {
        let item = self.slots.iter_mut().find_map(|slot| slot.pop_front())?;
        self.counter -= 1;
        Some(item)
    }

    /// Total number of queued items across all buckets
    pub fn count(&self) -> usize {
        self.counter
    }

    pub fn is_empty(&self) -> bool {
        self.counter == 0
    }

    /// Number of buckets
    pub fn priority_range(&self) -> usize {
        self.slots.len()
    }
}
