use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::buffer::Buffer;
use crate::error::PoolError;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// How `acquire_empty` behaves when no buffer is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Fail immediately with `PoolError::Exhausted`.
    NonBlocking,
    /// Wait for a release, optionally bounded.
    Blocking { timeout: Option<Duration> },
}

/// A fixed set of fixed-capacity buffers.
///
/// Buffers live either in the pool's available queue or with whoever
/// acquired them; the pool never allocates after construction.
pub struct BufferPool {
    id: u64,
    size: usize,
    buffer_size: usize,
    available: Mutex<VecDeque<Buffer>>,
    returned: Condvar,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl BufferPool {
    /// Create `count` buffers of `buffer_size` bytes each.
    pub fn new(count: usize, buffer_size: usize) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let available = (0..count)
            .map(|index| Buffer::new(index as u32, id, buffer_size))
            .collect::<VecDeque<_>>();
        debug!(pool = id, count, buffer_size, "buffer pool created");
        Self {
            id,
            size: count,
            buffer_size,
            available: Mutex::new(available),
            returned: Condvar::new(),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Take one empty buffer from the available queue.
    pub fn acquire_empty(&self, mode: AcquireMode) -> Result<Buffer, PoolError> {
        let mut available = self.lock();
        let buffer = match mode {
            AcquireMode::NonBlocking => available
                .pop_front()
                .ok_or(PoolError::Exhausted { size: self.size })?,
            AcquireMode::Blocking { timeout: None } => loop {
                if let Some(buffer) = available.pop_front() {
                    break buffer;
                }
                available = self
                    .returned
                    .wait(available)
                    .unwrap_or_else(PoisonError::into_inner);
            },
            AcquireMode::Blocking {
                timeout: Some(timeout),
            } => {
                let deadline = Instant::now() + timeout;
                loop {
                    if let Some(buffer) = available.pop_front() {
                        break buffer;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PoolError::Timeout(timeout));
                    }
                    available = self
                        .returned
                        .wait_timeout(available, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        };
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(buffer)
    }

    /// Return a buffer to the available queue, clearing it first.
    pub fn release(&self, mut buffer: Buffer) -> Result<(), PoolError> {
        if buffer.pool_id() != self.id {
            return Err(PoolError::ForeignBuffer {
                buffer_id: buffer.id(),
                owner: buffer.pool_id(),
                pool: self.id,
            });
        }
        buffer.clear();
        self.lock().push_back(buffer);
        self.released.fetch_add(1, Ordering::Relaxed);
        self.returned.notify_one();
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Total number of buffers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Capacity of each buffer in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Buffers currently in the available queue.
    pub fn available(&self) -> usize {
        self.lock().len()
    }

    /// Successful `acquire_empty` calls so far.
    pub fn acquired_count(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Successful `release` calls so far.
    pub fn released_count(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Buffer>> {
        self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("buffer_size", &self.buffer_size)
            .field("available", &self.available())
            .finish()
    }
}
