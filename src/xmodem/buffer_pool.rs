//! A small pool of reusable 8192-byte block buffers for the XMODEM-8K
//! engine, adapted from the teacher's `allocator::Allocator` (which
//! pools fixed-size network buffers over an async channel). XMODEM
//! runs on a blocking worker thread (spec.md §4.3/§5), so this pool
//! trades the teacher's `mpsc`-channel handoff for a lock-free
//! `crossbeam_queue::ArrayQueue`, which is cheap to pop/push from
//! synchronous code without awaiting anything.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Pool of same-sized byte buffers, recycled between blocks instead of
/// reallocating a fresh `Vec<u8>` for every packet.
pub struct BufferPool {
    slots: Arc<ArrayQueue<Vec<u8>>>,
    buffer_len: usize,
}

impl BufferPool {
    /// Creates a pool of `count` buffers, each `buffer_len` bytes.
    pub fn new(buffer_len: usize, count: usize) -> Self {
        let slots = Arc::new(ArrayQueue::new(count));
        for _ in 0..count {
            let _ = slots.push(vec![0u8; buffer_len]);
        }
        Self { slots, buffer_len }
    }

    /// Checks out a buffer, allocating a fresh one if the pool is
    /// momentarily exhausted (callers release in [`Self::release`]).
    pub fn checkout(&self) -> Vec<u8> {
        self.slots.pop().unwrap_or_else(|| vec![0u8; self.buffer_len])
    }

    /// Returns a buffer to the pool for reuse; buffers of the wrong
    /// size are dropped instead of poisoning future checkouts.
    pub fn release(&self, mut buffer: Vec<u8>) {
        if buffer.len() != self.buffer_len {
            return;
        }
        buffer.iter_mut().for_each(|b| *b = 0);
        let _ = self.slots.push(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_and_release_reuses_buffers() {
        let pool = BufferPool::new(8192, 2);
        let a = pool.checkout();
        let b = pool.checkout();
        assert_eq!(a.len(), 8192);
        assert_eq!(b.len(), 8192);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.checkout().len(), 8192);
    }

    #[test]
    fn checkout_past_capacity_falls_back_to_allocation() {
        let pool = BufferPool::new(128, 1);
        let _a = pool.checkout();
        let b = pool.checkout();
        assert_eq!(b.len(), 128);
    }
}
