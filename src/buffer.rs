//! Engine-scoped pool of reusable byte buffers.
//!
//! Record assembly, params encoding, and response accumulation all need a
//! scratch `BytesMut`. Instead of a process-wide pool, each connection owns
//! its own [`BufferPool`] whose lifecycle ends with the connection, so there
//! is no hidden cross-call coupling. A buffer handed out by the pool is
//! always cleared; callers must not rely on previous contents.

use bytes::BytesMut;

/// Number of buffers kept around after release.
const POOL_CAPACITY: usize = 4;

/// Initial capacity for freshly allocated buffers.
const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// A small pool of reusable `BytesMut` buffers.
///
/// Not thread-safe on its own; the connection's lock already serializes all
/// access.
#[derive(Debug)]
pub struct BufferPool {
    free: Vec<BytesMut>,
}

impl BufferPool {
    /// Create an empty pool. Buffers are allocated lazily on first acquire.
    pub fn new() -> Self {
        Self {
            free: Vec::with_capacity(POOL_CAPACITY),
        }
    }

    /// Take a cleared buffer from the pool, allocating if none is free.
    pub fn acquire(&mut self) -> BytesMut {
        match self.free.pop() {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Return a buffer to the pool for reuse.
    ///
    /// Buffers beyond the pool capacity are dropped instead of retained.
    pub fn release(&mut self, buf: BytesMut) {
        if self.free.len() < POOL_CAPACITY {
            self.free.push(buf);
        }
    }

    /// Number of buffers currently held by the pool.
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
