//! RAM-backed `embedded-storage` implementation.
//!
//! Starts out erased (all `0xFF`) like real NOR flash. Used by the tests and
//! wrapped by the simulator's file-backed image.

use alloc::vec;
use alloc::vec::Vec;

use embedded_storage::{ReadStorage, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFlashError {
    OutOfBounds { offset: u32, len: usize },
}

#[derive(Debug, Clone)]
pub struct MemoryFlash {
    bytes: Vec<u8>,
    writes: usize,
}

impl MemoryFlash {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0xFF; capacity],
            writes: 0,
        }
    }

    /// Wrap an existing image. Shorter images are padded with erased bytes.
    pub fn from_image(mut image: Vec<u8>, capacity: usize) -> Self {
        if image.len() < capacity {
            image.resize(capacity, 0xFF);
        }
        Self {
            bytes: image,
            writes: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Number of successful writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, MemoryFlashError> {
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(MemoryFlashError::OutOfBounds { offset, len })?;
        Ok(start..end)
    }
}

impl ReadStorage for MemoryFlash {
    type Error = MemoryFlashError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Storage for MemoryFlash {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        self.bytes[range].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}
