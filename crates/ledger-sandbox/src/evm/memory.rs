//! # Frame Memory
//!
//! Byte-addressable, word-aligned, zero-initialised. Growth is priced by
//! [`Memory::expansion_cost`] before it happens and capped at
//! [`MAX_MEMORY_SIZE`].

use crate::errors::VmError;
use crate::evm::gas::memory_cost;

/// Hard cap on frame memory (16 MiB).
pub const MAX_MEMORY_SIZE: usize = 16 * 1024 * 1024;

/// Word size in bytes.
pub const WORD_SIZE: usize = 32;

/// Frame memory.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Size in bytes (always a multiple of 32).
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if nothing has been touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Gas to grow memory so that `end` bytes are addressable.
    ///
    /// # Errors
    ///
    /// `MemoryLimitExceeded` past [`MAX_MEMORY_SIZE`].
    pub fn expansion_cost(&self, end: usize) -> Result<u64, VmError> {
        if end <= self.data.len() {
            return Ok(0);
        }
        if end > MAX_MEMORY_SIZE {
            return Err(VmError::MemoryLimitExceeded {
                requested: end,
                max: MAX_MEMORY_SIZE,
            });
        }
        let old_words = (self.data.len() / WORD_SIZE) as u64;
        let new_words = end.div_ceil(WORD_SIZE) as u64;
        Ok(memory_cost(new_words) - memory_cost(old_words))
    }

    /// Grows to cover `end` bytes. Callers charge [`Memory::expansion_cost`]
    /// first.
    pub fn resize(&mut self, end: usize) {
        if end > self.data.len() {
            self.data.resize(end.div_ceil(WORD_SIZE) * WORD_SIZE, 0);
        }
    }

    /// Reads `size` bytes. Bytes past the end read as zero.
    #[must_use]
    pub fn read(&self, offset: usize, size: usize) -> Vec<u8> {
        let mut out = vec![0u8; size];
        if offset < self.data.len() {
            let end = offset.saturating_add(size).min(self.data.len());
            out[..end - offset].copy_from_slice(&self.data[offset..end]);
        }
        out
    }

    /// Reads one 32-byte word.
    #[must_use]
    pub fn read_word(&self, offset: usize) -> [u8; 32] {
        let mut word = [0u8; 32];
        word.copy_from_slice(&self.read(offset, WORD_SIZE));
        word
    }

    /// Writes `bytes` at `offset`, growing as needed.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let end = offset + bytes.len();
        self.resize(end);
        self.data[offset..end].copy_from_slice(bytes);
    }

    /// Copies `size` bytes of `source[source_offset..]` to `offset`,
    /// zero-filling past the end of `source`.
    pub fn copy_from(&mut self, offset: usize, source: &[u8], source_offset: usize, size: usize) {
        if size == 0 {
            return;
        }
        let mut chunk = vec![0u8; size];
        if source_offset < source.len() {
            let end = source_offset.saturating_add(size).min(source.len());
            chunk[..end - source_offset].copy_from_slice(&source[source_offset..end]);
        }
        self.write(offset, &chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_aligns_to_words() {
        let mut mem = Memory::new();
        mem.write(0, &[1]);
        assert_eq!(mem.len(), 32);
        mem.write(32, &[2]);
        assert_eq!(mem.len(), 64);
    }

    #[test]
    fn test_reads_past_end_are_zero() {
        let mut mem = Memory::new();
        mem.write(0, &[0xaa; 4]);
        assert_eq!(mem.read(2, 4), vec![0xaa, 0xaa, 0, 0]);
        assert_eq!(mem.read(100, 2), vec![0, 0]);
        assert_eq!(mem.read_word(0)[..4], [0xaa; 4]);
    }

    #[test]
    fn test_expansion_cost() {
        let mut mem = Memory::new();
        assert_eq!(mem.expansion_cost(32).unwrap(), 3);
        mem.resize(32);
        assert_eq!(mem.expansion_cost(32).unwrap(), 0);
        assert_eq!(mem.expansion_cost(64).unwrap(), 3);
    }

    #[test]
    fn test_limit() {
        let mem = Memory::new();
        assert!(matches!(
            mem.expansion_cost(MAX_MEMORY_SIZE + 1),
            Err(VmError::MemoryLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_copy_from_zero_fills() {
        let mut mem = Memory::new();
        mem.copy_from(0, &[1, 2, 3], 1, 4);
        assert_eq!(mem.read(0, 4), vec![2, 3, 0, 0]);
    }
}
