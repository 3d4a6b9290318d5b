//! Bounded FIFO used to accumulate notification fragments.

use crate::error::RingError;
use std::collections::VecDeque;
use std::fmt;

pub const DEFAULT_CAPACITY: usize = 512;

/// Fixed capacity byte queue.
///
/// Bytes are pushed at the back as fragments arrive and consumed from the
/// front by the frame decoder. The capacity never grows.
#[derive(Clone)]
pub struct ByteRing {
    bytes: VecDeque<u8>,
    capacity: usize,
}

impl ByteRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.bytes.len() >= self.capacity
    }

    pub fn push(&mut self, byte: u8) -> Result<(), RingError> {
        if self.is_full() {
            return Err(RingError::Overflow {
                capacity: self.capacity,
            });
        }
        self.bytes.push_back(byte);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Result<u8, RingError> {
        self.bytes.pop_front().ok_or(RingError::Empty)
    }

    pub fn peek_front(&self) -> Option<u8> {
        self.bytes.front().copied()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Copy of the buffered bytes, front first. Used for diagnostics only.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.iter().copied().collect()
    }
}

impl Default for ByteRing {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A full ring holding exactly `bytes`.
impl From<&[u8]> for ByteRing {
    fn from(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.iter().copied().collect(),
            capacity: bytes.len(),
        }
    }
}

impl fmt::Debug for ByteRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteRing({}/{}) {:02X?}", self.len(), self.capacity, self.bytes)
    }
}
