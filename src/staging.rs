use alloc::vec::Vec;
use log::error;

use crate::DfuError;

/// Bytes written to a filesystem entity, held until the entity is flushed.
pub struct StagingBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl StagingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
        }
    }

    /// Appends `bytes` to the staged data.
    ///
    /// If the result would not fit, everything staged so far is discarded
    /// and [`DfuError::BufferOverflow`] is returned.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), DfuError> {
        let fits = self
            .data
            .len()
            .checked_add(bytes.len())
            .is_some_and(|len| len <= self.capacity);
        if !fits {
            error!(
                "Staging buffer overflow: {} + {} > {} bytes, staged data dropped",
                self.data.len(),
                bytes.len(),
                self.capacity
            );
            self.clear();
            return Err(DfuError::BufferOverflow);
        }

        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}
