//! # Domain Layer
//!
//! Pure types and helpers with no I/O: value objects, entities and
//! stateless services.

pub mod entities;
pub mod services;
pub mod value_objects;

pub use entities::*;
pub use services::*;
pub use value_objects::*;
