use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};

const INITIAL_CAPACITY: usize = 8 * 1024;
/// Buffers that grew beyond this are dropped instead of pooled.
const MAX_POOLED_CAPACITY: usize = 4 * 1024 * 1024;
const MAX_POOLED: usize = 64;

/// Shared pool of body-draining buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take a cleared buffer; it goes back to the pool when the guard drops.
    pub fn get(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(INITIAL_CAPACITY));
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    fn put(&self, mut buf: BytesMut) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < MAX_POOLED {
            free.push(buf);
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A buffer on loan from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// Copy the contents out; the buffer itself stays with the pool.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::BufferPool;

    #[test]
    fn buffers_return_cleared_on_drop() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.get();
            buf.extend_from_slice(b"hello");
            assert_eq!(buf.to_bytes().as_ref(), b"hello");
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 1);
        let again = pool.get();
        assert!(again.is_empty());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn buffers_return_on_early_exit() {
        let pool = BufferPool::new();
        let failing = || -> Result<(), &'static str> {
            let mut buf = pool.get();
            buf.extend_from_slice(b"partial");
            Err("body stream broke")
        };
        assert!(failing().is_err());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn oversized_buffers_are_not_kept() {
        let pool = BufferPool::new();
        {
            let mut buf = pool.get();
            buf.resize(5 * 1024 * 1024, 0);
        }
        assert_eq!(pool.idle(), 0);
    }
}
