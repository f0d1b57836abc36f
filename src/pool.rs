//! State buffer pool
//!
//! Snapshot saves and loads run in the per-frame hot path, several times per
//! frame during a rollback. The pool hands out fixed-capacity buffers and
//! caps the outstanding count so worst-case memory stays bounded; exhaustion
//! degrades to a failed save rather than blocking or growing without bound.
//!
//! All pool access happens on the emulation thread, so no locking is needed.

use std::sync::atomic::{AtomicU32, Ordering};

use hashbrown::HashSet;

// Ids are process-wide so a buffer from one pool can never alias a
// tracked buffer in another.
static NEXT_BUFFER_ID: AtomicU32 = AtomicU32::new(0);

/// Default buffer capacity, sized to the worst-case emulator snapshot plus
/// header and compression slack
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Default cap on outstanding buffers
pub const DEFAULT_MAX_BUFFERS: usize = 4;

/// A fixed-capacity buffer owned by a [`StateBufferPool`]
///
/// Borrowed via [`StateBufferPool::acquire`] and returned exactly once via
/// [`StateBufferPool::release`].
#[derive(Debug)]
pub struct PooledBuffer {
    id: u32,
    data: Box<[u8]>,
}

impl PooledBuffer {
    /// Pool-assigned identity, stable for the buffer's lifetime
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// View the buffer contents
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view of the buffer contents
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Pool of reusable fixed-size state buffers
pub struct StateBufferPool {
    buffer_size: usize,
    max_buffers: usize,
    free: Vec<PooledBuffer>,
    in_use: HashSet<u32>,
}

impl StateBufferPool {
    /// Create a pool with the given buffer capacity and outstanding cap
    ///
    /// One buffer is allocated up front so the first save never pays for an
    /// allocation.
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        let mut pool = Self {
            buffer_size,
            max_buffers,
            free: Vec::with_capacity(max_buffers),
            in_use: HashSet::with_capacity(max_buffers),
        };
        if max_buffers > 0 {
            let buffer = pool.allocate();
            pool.free.push(buffer);
        }
        pool
    }

    /// Create a pool with default capacity and cap
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_MAX_BUFFERS)
    }

    /// Borrow a buffer from the pool
    ///
    /// Returns a free buffer if one exists, allocates a new one while under
    /// the cap, and returns `None` once `max_buffers` are outstanding.
    pub fn acquire(&mut self) -> Option<PooledBuffer> {
        let buffer = match self.free.pop() {
            Some(buffer) => buffer,
            None if self.in_use.len() < self.max_buffers => self.allocate(),
            None => {
                log::warn!(
                    "state buffer pool exhausted ({} buffers outstanding)",
                    self.in_use.len()
                );
                return None;
            }
        };
        self.in_use.insert(buffer.id);
        Some(buffer)
    }

    /// Return a borrowed buffer to the free list
    ///
    /// A buffer this pool does not track as in-use is dropped without
    /// touching the bookkeeping.
    pub fn release(&mut self, buffer: PooledBuffer) {
        if self.in_use.remove(&buffer.id) {
            self.free.push(buffer);
        } else {
            log::warn!("release of untracked state buffer {} ignored", buffer.id);
        }
    }

    /// Buffer capacity in bytes
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of buffers currently borrowed
    pub fn in_use(&self) -> usize {
        self.in_use.len()
    }

    /// Number of buffers on the free list
    pub fn available(&self) -> usize {
        self.free.len()
    }

    fn allocate(&mut self) -> PooledBuffer {
        let id = NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed);
        PooledBuffer {
            id,
            data: vec![0u8; self.buffer_size].into_boxed_slice(),
        }
    }
}

impl Default for StateBufferPool {
    fn default() -> Self {
        Self::with_defaults()
    }
}
