//! Bounded reuse pool for body-read scratch buffers.
//!
//! Buffers are handed out through an RAII guard, so they return to the pool
//! on every exit path, including early returns and panics. Acquisition never
//! blocks: an empty pool falls back to a fresh allocation, and the pool keeps
//! at most a fixed number of buffers alive.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;

const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_MAX_POOLED: usize = 8;

#[derive(Debug)]
struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_pooled: usize,
}

/// Shared, bounded pool of fixed-size byte buffers.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_MAX_POOLED)
    }
}

impl BufferPool {
    /// Create a pool of `max_pooled` buffers of `buffer_size` bytes each.
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        assert!(buffer_size > 0, "buffer size must be greater than zero");
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_pooled)),
                buffer_size,
                max_pooled,
            }),
        }
    }

    /// Take a buffer from the pool, or allocate one when none is free.
    pub fn acquire(&self) -> PooledBuf {
        let buf = self
            .inner
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| vec![0; self.inner.buffer_size]);
        PooledBuf {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Number of buffers currently parked in the pool.
    pub fn pooled(&self) -> usize {
        self.inner.free.lock().len()
    }
}

/// Scoped buffer handle; dropping it returns the buffer to the pool.
#[derive(Debug)]
pub struct PooledBuf {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        let mut free = self.pool.free.lock();
        if free.len() < self.pool.max_pooled {
            buf.resize(self.pool.buffer_size, 0);
            free.push(buf);
        }
    }
}
