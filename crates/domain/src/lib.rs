//! # offsync Domain
//!
//! Data model of the offline-first sync queue.
//!
//! This crate contains:
//! - The operation record and its status state machine
//! - The declarative entity schema (priorities and parent references)
//! - Identifier mappings and queue reporting types
//! - Domain error types, the remote error taxonomy and `Result`
//! - Configuration structures
//!
//! ## Architecture
//! - No dependencies on other offsync crates
//! - No I/O, only data structures and validation

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
