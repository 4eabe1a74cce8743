use std::collections::VecDeque;

use dashmap::DashMap;

/// A bucketed sliding-window counter.
///
/// The window holds at most `capacity` per-bucket counts, oldest first, plus a
/// running `total` equal to their sum. Time is external: a periodic task calls
/// [`advance`](SlidingWindowCounter::advance) once per bucket duration, and
/// requests call [`increment`](SlidingWindowCounter::increment) against the
/// newest bucket.
#[derive(Debug, Clone)]
pub struct SlidingWindowCounter {
    total: u64,
    buckets: VecDeque<u64>,
    capacity: usize,
}

impl SlidingWindowCounter {
    /// Create a window of `capacity` buckets with one (empty) current bucket.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut buckets = VecDeque::with_capacity(capacity + 1);
        buckets.push_back(0);
        Self {
            total: 0,
            buckets,
            capacity,
        }
    }

    /// Shift the window forward by one bucket.
    ///
    /// Appends a zeroed bucket and, once over capacity, drops the oldest one
    /// and subtracts its count from the total.
    pub fn advance(&mut self) {
        self.buckets.push_back(0);
        while self.buckets.len() > self.capacity {
            if let Some(dropped) = self.buckets.pop_front() {
                if dropped > self.total {
                    tracing::warn!(
                        dropped,
                        total = self.total,
                        "sliding window total would go negative, clamping to zero"
                    );
                }
                self.total = self.total.saturating_sub(dropped);
            }
        }
    }

    /// Count one event in the current bucket.
    pub fn increment(&mut self) {
        match self.buckets.back_mut() {
            Some(last) => *last += 1,
            None => self.buckets.push_back(1),
        }
        self.total += 1;
    }

    /// Running total over the whole window.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// `true` when nothing has been counted inside the window.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of buckets currently held.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bucket counts, oldest first.
    pub fn buckets(&self) -> impl Iterator<Item = u64> + '_ {
        self.buckets.iter().copied()
    }
}

/// Advance every window in `windows` and drop the ones that became empty.
///
/// Returns the number of removed entries. Each shard is locked only while it
/// is being walked, so concurrent increments on other keys are not stalled.
pub fn advance_windows(windows: &DashMap<String, SlidingWindowCounter>) -> usize {
    let before = windows.len();
    windows.retain(|_key, window| {
        window.advance();
        !window.is_empty()
    });
    before.saturating_sub(windows.len())
}
