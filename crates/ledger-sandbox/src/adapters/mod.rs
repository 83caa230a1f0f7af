//! # Adapters
//!
//! Reference implementations of the outbound ports.

pub mod chain;

pub use chain::{Genesis, InMemoryChain, StateStore, WorldState};
