//! Message buffers lent to the NA layer while operations are posted.
//!
//! A handle owns one input and one output buffer for its whole lifetime; the
//! NA backend holds a clone while a send or receive is outstanding and copies
//! message bytes under the lock. Capacity is fixed at creation to the NA's
//! maximum expected message size.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

/// Fixed-capacity buffer shared between a handle and posted NA operations.
#[derive(Clone)]
pub struct MsgBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    capacity: usize,
}

impl MsgBuffer {
    /// Allocate a zero-filled buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0u8; capacity])),
            capacity,
        }
    }

    /// Fixed capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lock the buffer contents.
    pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_capacity_is_fixed() {
        let buf = MsgBuffer::new(128);
        assert_eq!(buf.capacity(), 128);
        assert_eq!(buf.lock().len(), 128);
        assert!(buf.lock().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_buffer_clones_share_storage() {
        let buf = MsgBuffer::new(16);
        let alias = buf.clone();
        buf.lock()[0] = 0xAB;
        assert_eq!(alias.lock()[0], 0xAB);
    }
}
