use std::collections::VecDeque;

/// FIFO of registry indices waiting for a poll.
///
/// An index is never queued twice; pushing one that is already waiting is a
/// no-op.
#[derive(Debug, Clone, Default)]
pub struct PollingQueue {
    queue: VecDeque<usize>,
}

impl PollingQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.queue.contains(&index)
    }

    /// Append `index` at the tail. Returns false when it was already queued.
    pub fn push(&mut self, index: usize) -> bool {
        if self.contains(index) {
            log::debug!("Battery #{index} already queued");
            return false;
        }
        self.queue.push_back(index);
        true
    }

    pub fn pop(&mut self) -> Option<usize> {
        self.queue.pop_front()
    }

    /// Queue every index of a registry with `count` entries, in order.
    pub fn refill(&mut self, count: usize) {
        for index in 0..count {
            self.push(index);
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.queue.iter().copied()
    }
}
