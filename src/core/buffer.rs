//! Purpose: Share decode/encode scratch buffers across calls.
//! Exports: `BufferPool`, `PooledBuffer`, `DEFAULT_BUFFER_SIZE`.
//! Role: The only cross-call mutable resource in the client.
//! Invariants: A rented buffer is returned when its guard drops, on every exit path.
//! Invariants: Buffers come back empty and no larger than the pool's buffer size.
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, LazyLock, Mutex};

pub const DEFAULT_BUFFER_SIZE: usize = 4096;
const DEFAULT_RETAINED: usize = 64;

#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_retained: usize,
}

static SHARED: LazyLock<BufferPool> = LazyLock::new(|| BufferPool::new(DEFAULT_BUFFER_SIZE));

impl BufferPool {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                buffer_size,
                max_retained: DEFAULT_RETAINED,
            }),
        }
    }

    /// Process-wide pool with `DEFAULT_BUFFER_SIZE` buffers.
    pub fn shared() -> &'static BufferPool {
        &SHARED
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Buffers currently parked in the pool.
    pub fn available(&self) -> usize {
        self.inner.lock_free().len()
    }

    pub fn rent(&self) -> PooledBuffer {
        let buf = self
            .inner
            .lock_free()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.inner.buffer_size));
        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.inner.buffer_size)
            .field("available", &self.available())
            .finish()
    }
}

impl PoolInner {
    fn lock_free(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        self.free.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Rented buffer; derefs to an empty `Vec<u8>` with at least the pool's capacity.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        buf.shrink_to(self.pool.buffer_size);
        let mut free = self.pool.lock_free();
        if free.len() < self.pool.max_retained {
            free.push(buf);
        }
    }
}
