//! Operand stack: 1024 words, LIFO.

use crate::domain::value_objects::U256;
use crate::errors::VmError;

/// Maximum stack depth.
pub const MAX_STACK_SIZE: usize = 1024;

/// Interpreter operand stack.
#[derive(Clone, Debug, Default)]
pub struct Stack {
    data: Vec<U256>,
}

impl Stack {
    /// Empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(64),
        }
    }

    /// Current depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Pushes a word.
    ///
    /// # Errors
    ///
    /// `StackOverflow` at depth 1024.
    pub fn push(&mut self, value: U256) -> Result<(), VmError> {
        if self.data.len() >= MAX_STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.data.push(value);
        Ok(())
    }

    /// Pops the top word.
    ///
    /// # Errors
    ///
    /// `StackUnderflow` when empty.
    pub fn pop(&mut self) -> Result<U256, VmError> {
        self.data.pop().ok_or(VmError::StackUnderflow)
    }

    /// `DUPn`: copies the word at `depth` (0 = top) onto the top.
    ///
    /// # Errors
    ///
    /// `StackUnderflow` or `StackOverflow`.
    pub fn dup(&mut self, depth: usize) -> Result<(), VmError> {
        let len = self.data.len();
        if depth >= len {
            return Err(VmError::StackUnderflow);
        }
        self.push(self.data[len - 1 - depth])
    }

    /// `SWAPn`: exchanges the top with the word `n` below it.
    ///
    /// # Errors
    ///
    /// `StackUnderflow` if fewer than `n + 1` words.
    pub fn swap(&mut self, n: usize) -> Result<(), VmError> {
        let len = self.data.len();
        if n == 0 || n >= len {
            return Err(VmError::StackUnderflow);
        }
        self.data.swap(len - 1, len - 1 - n);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = Stack::new();
        stack.push(U256::from(1)).unwrap();
        stack.push(U256::from(2)).unwrap();
        assert_eq!(stack.pop().unwrap(), U256::from(2));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_underflow() {
        assert_eq!(Stack::new().pop().unwrap_err(), VmError::StackUnderflow);
    }

    #[test]
    fn test_overflow() {
        let mut stack = Stack::new();
        for i in 0..MAX_STACK_SIZE {
            stack.push(U256::from(i)).unwrap();
        }
        assert_eq!(stack.push(U256::zero()).unwrap_err(), VmError::StackOverflow);
        assert_eq!(stack.dup(0).unwrap_err(), VmError::StackOverflow);
    }

    #[test]
    fn test_dup_and_swap() {
        let mut stack = Stack::new();
        stack.push(U256::from(1)).unwrap();
        stack.push(U256::from(2)).unwrap();
        stack.dup(1).unwrap();
        assert_eq!(stack.pop().unwrap(), U256::from(1));
        stack.swap(1).unwrap();
        assert_eq!(stack.pop().unwrap(), U256::from(1));
        assert_eq!(stack.pop().unwrap(), U256::from(2));
        assert!(stack.is_empty());
    }
}
