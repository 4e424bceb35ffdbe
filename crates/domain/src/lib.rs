//! # Diagsync Domain
//!
//! Data types shared by the sync layer.
//!
//! This crate contains:
//! - Diagram records, index rows and cache notifications
//! - Telemetry queue items and their flattened record form
//! - Session/user snapshots
//! - Domain error types and Result definitions
//! - Configuration structures and constants
//!
//! ## Architecture
//! - No dependencies on other diagsync crates
//! - No I/O; pure data and validation

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
