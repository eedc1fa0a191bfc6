//! A bounded free-list of reusable byte buffers.
//!
//! The pump loops in [`crate::session`] would otherwise allocate a fresh
//! buffer per read; under load that puts constant pressure on the
//! allocator for no benefit, since the buffers are all the same size and
//! short-lived. `BufferPool` caps steady-state memory at
//! `capacity * buffer_size` while still letting bursts allocate past that
//! bound instead of blocking.

use std::sync::Mutex;

use bytes::BytesMut;

/// Fixed-capacity, fixed-buffer-size pool shared across all sessions of one
/// tunnel. `acquire`/`release` never block: an empty pool allocates, a full
/// pool drops.
pub struct BufferPool {
    buffer_size: usize,
    capacity: usize,
    free: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        BufferPool {
            buffer_size,
            capacity,
            free: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Returns a zero-filled buffer of `buffer_size` bytes, reused from the
    /// pool when one is available.
    pub fn acquire(&self) -> BytesMut {
        let existing = self.free.lock().unwrap().pop();
        match existing {
            Some(mut buf) => {
                buf.clear();
                buf.resize(self.buffer_size, 0);
                buf
            }
            None => BytesMut::zeroed(self.buffer_size),
        }
    }

    /// Returns `buf` to the pool. Dropped on the floor once the pool is at
    /// capacity, so callers must not assume a given buffer will come back.
    pub fn release(&self, buf: BytesMut) {
        let mut free = self.free.lock().unwrap();
        if free.len() < self.capacity {
            free.push(buf);
        }
    }

    /// Number of buffers currently sitting idle in the pool. Exposed for
    /// tests and diagnostics only.
    pub fn len(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_on_empty_pool_allocates() {
        let pool = BufferPool::new(4096, 4);
        let buf = pool.acquire();
        assert_eq!(buf.len(), 4096);
    }

    #[test]
    fn release_then_acquire_reuses_buffer() {
        let pool = BufferPool::new(16, 2);
        let buf = pool.acquire();
        pool.release(buf);
        assert_eq!(pool.len(), 1);
        let reused = pool.acquire();
        assert_eq!(reused.len(), 16);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn pool_never_exceeds_configured_capacity() {
        let pool = BufferPool::new(16, 2);
        for _ in 0..10 {
            pool.release(BytesMut::zeroed(16));
        }
        assert!(pool.len() <= 2);
    }
}
