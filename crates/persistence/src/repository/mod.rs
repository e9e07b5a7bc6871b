//! Repository implementations for database operations

pub mod coordination;

pub use coordination::*;
