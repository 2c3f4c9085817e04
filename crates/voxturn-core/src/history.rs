use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Fixed-capacity FIFO history. Pushing into a full history evicts the
/// oldest entry.
pub struct BoundedHistory<T> {
    rb: HeapRb<T>,
}

impl<T> BoundedHistory<T> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            rb: HeapRb::new(capacity.max(1)),
        }
    }

    /// Append `item`, returning the evicted entry if the history was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        self.rb.push_overwrite(item)
    }

    pub fn len(&self) -> usize {
        self.rb.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.rb.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rb.capacity().get()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.rb.iter()
    }

    /// The `n` most recent entries, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.len().saturating_sub(n);
        self.rb.iter().skip(skip)
    }

    pub fn last(&self) -> Option<&T> {
        self.rb.iter().last()
    }

    pub fn clear(&mut self) {
        self.rb.clear();
    }
}

impl<T: Clone> BoundedHistory<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.rb.iter().cloned().collect()
    }
}
