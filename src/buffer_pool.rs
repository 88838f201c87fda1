//! Pooled receive buffers shared across connections.
//!
//! Each connection's reader borrows one fixed-capacity buffer for the
//! lifetime of the connection and returns it on disconnect. The pool bounds
//! the number of buffers alive at once; exhaustion is fatal for the
//! connection that hit it.

use std::sync::Mutex;

use bytes::BytesMut;

use crate::error::TransportError;

struct PoolState {
    free: Vec<BytesMut>,
    outstanding: usize,
}

/// Bounded pool of fixed-capacity receive buffers.
pub struct BufferPool {
    buffer_capacity: usize,
    max_buffers: usize,
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Create a pool of at most `max_buffers` buffers of `buffer_capacity`
    /// bytes each. Buffers are allocated lazily on first acquire.
    #[must_use]
    pub fn new(buffer_capacity: usize, max_buffers: usize) -> Self {
        Self {
            buffer_capacity,
            max_buffers,
            state: Mutex::new(PoolState {
                free: Vec::new(),
                outstanding: 0,
            }),
        }
    }

    /// Borrow a cleared buffer from the pool.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PoolExhausted`] when `max_buffers` buffers
    /// are already outstanding.
    pub fn acquire(&self) -> Result<BytesMut, TransportError> {
        let mut state = self.state.lock().expect("buffer pool lock poisoned");
        if let Some(buffer) = state.free.pop() {
            state.outstanding += 1;
            return Ok(buffer);
        }
        if state.outstanding >= self.max_buffers {
            return Err(TransportError::PoolExhausted);
        }
        state.outstanding += 1;
        Ok(BytesMut::with_capacity(self.buffer_capacity))
    }

    /// Return a buffer for reuse by later connections.
    pub fn release(&self, mut buffer: BytesMut) {
        buffer.clear();
        let mut state = self.state.lock().expect("buffer pool lock poisoned");
        state.outstanding = state.outstanding.saturating_sub(1);
        state.free.push(buffer);
    }

    /// Fixed capacity of each pooled buffer.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize { self.buffer_capacity }

    /// Buffers currently lent out.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.state.lock().expect("buffer pool lock poisoned").outstanding
    }
}
