//! Bounded concurrent FIFO shared by the audio accumulator and the playback
//! queue. Internal locking; callers never synchronize around it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

/// A bounded multi-producer FIFO of owned buffers.
///
/// When full, the oldest entry is evicted so realtime data stays fresh
/// rather than stale data backing up the pipeline.
pub struct ChunkFifo<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> ChunkFifo<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "fifo capacity must be non-zero");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append to the tail, evicting the head if the queue is full.
    pub fn push(&self, item: T) {
        let mut queue = self.lock();
        if queue.len() == self.capacity {
            queue.pop_front();
            warn!("fifo full ({} entries), dropping oldest", self.capacity);
        }
        queue.push_back(item);
    }

    /// Pop the head, if any.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Atomically take everything currently queued, in order.
    pub fn drain_all(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn pops_in_push_order() {
        let fifo = ChunkFifo::new(8);
        for i in 0..5 {
            fifo.push(i);
        }
        assert_eq!(fifo.len(), 5);
        for i in 0..5 {
            assert_eq!(fifo.pop(), Some(i));
        }
        assert_eq!(fifo.pop(), None);
        assert!(fifo.is_empty());
    }

    #[test]
    fn evicts_oldest_when_full() {
        let fifo = ChunkFifo::new(3);
        for i in 0..5 {
            fifo.push(i);
        }
        assert_eq!(fifo.len(), 3);
        assert_eq!(fifo.pop(), Some(2));
        assert_eq!(fifo.pop(), Some(3));
        assert_eq!(fifo.pop(), Some(4));
    }

    #[test]
    fn drain_all_takes_everything_in_order() {
        let fifo = ChunkFifo::new(8);
        fifo.push("a");
        fifo.push("b");
        fifo.push("c");
        assert_eq!(fifo.drain_all(), vec!["a", "b", "c"]);
        assert!(fifo.is_empty());
        assert!(fifo.drain_all().is_empty());
    }

    #[test]
    fn concurrent_pushes_all_arrive() {
        let fifo = Arc::new(ChunkFifo::new(1024));
        let mut handles = Vec::new();
        for t in 0..4 {
            let fifo = Arc::clone(&fifo);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    fifo.push(t * 1000 + i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(fifo.len(), 400);

        // Per-producer order is preserved even though producers interleave.
        let mut drained = fifo.drain_all();
        for t in 0..4 {
            let ours: Vec<_> = drained.iter().filter(|v| **v / 1000 == t).collect();
            assert!(ours.windows(2).all(|w| w[0] < w[1]));
        }
        drained.sort();
        assert_eq!(drained.len(), 400);
    }
}
