//! Bounded drop-oldest hand-off between frame ingestion and the control loop.
//!
//! Neither side ever blocks: a full buffer evicts its oldest entry, an empty
//! buffer returns `None`. The control loop always sees recent frames even when
//! the detector falls behind ingestion.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Point-in-time buffer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameBufferStats {
    pub dropped_count: u64,
    pub current_size: usize,
}

#[derive(Debug)]
struct Inner<T> {
    queue: Mutex<VecDeque<T>>,
    max_size: usize,
    dropped: AtomicU64,
}

/// Cloneable handle to a shared bounded buffer.
///
/// The producer (ingestion thread) and consumer (session runner) each hold a
/// clone.
#[derive(Debug)]
pub struct FrameBuffer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for FrameBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> FrameBuffer<T> {
    /// Creates a buffer holding at most `max_size` entries.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_size` is zero.
    pub fn new(max_size: usize) -> DomainResult<Self> {
        if max_size == 0 {
            return Err(DomainError::invalid("frame_buffer_size", max_size, "value >= 1"));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::with_capacity(max_size)),
                max_size,
                dropped: AtomicU64::new(0),
            }),
        })
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Appends `item`, evicting the oldest entry if the buffer is full.
    pub fn put(&self, item: T) {
        let mut queue = self.lock();
        while queue.len() >= self.inner.max_size {
            if queue.pop_front().is_none() {
                break;
            }
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(item);
    }

    /// Removes and returns the oldest entry, if any.
    pub fn get_nowait(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn stats(&self) -> FrameBufferStats {
        let current_size = self.lock().len();
        FrameBufferStats {
            dropped_count: self.inner.dropped.load(Ordering::Relaxed),
            current_size,
        }
    }

    // A poisoned lock only means another holder panicked mid-operation; the
    // deque itself is still structurally valid.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
