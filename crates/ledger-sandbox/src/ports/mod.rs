//! # Ports
//!
//! Hexagonal boundaries.
//!
//! - `inbound`: the backend API callers drive.
//! - `outbound`: state, engine, pool and chain services the backend drives.

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
