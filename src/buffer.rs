//! Bounded text buffer holding the most recent inbound message.

use std::borrow::Cow;
use std::fmt;

use crate::error::BufferError;

/// Capacity of the receive buffer, including the terminator slot.
pub const RECEIVE_CAPACITY: usize = 1024;

/// Shown until the first successful read.
pub const PLACEHOLDER: &str = "nothing";

/// The last message read from the port, overwritten wholesale on every read.
///
/// Holds at most `capacity - 1` bytes; one slot is reserved for a terminator.
#[derive(Clone, PartialEq, Eq)]
pub struct ReceiveBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::with_capacity(RECEIVE_CAPACITY)
    }

    /// # Panics
    ///
    /// Panics if `capacity` is zero or cannot hold the placeholder.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > PLACEHOLDER.len(), "receive buffer capacity too small");
        let mut data = Vec::with_capacity(capacity);
        data.extend_from_slice(PLACEHOLDER.as_bytes());
        Self { data, capacity }
    }

    /// Most bytes a single message may hold.
    pub fn max_len(&self) -> usize {
        self.capacity - 1
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Replace the contents with `bytes`.
    ///
    /// On overflow the previous contents are kept and an error is returned.
    pub fn overwrite(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        if bytes.len() > self.max_len() {
            return Err(BufferError::Overflow {
                len: bytes.len(),
                capacity: self.capacity,
            });
        }
        self.data.clear();
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Contents as text; invalid UTF-8 is replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Restore the placeholder text.
    pub fn reset(&mut self) {
        self.data.clear();
        self.data.extend_from_slice(PLACEHOLDER.as_bytes());
    }
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReceiveBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReceiveBuffer({:?}, {}/{})", self.text(), self.data.len(), self.capacity)
    }
}

impl fmt::Display for ReceiveBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}
