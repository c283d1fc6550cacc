//! Thinlab Core - Shared data model for the thin-clone database lab engine
//!
//! This crate provides:
//! - API-facing clone and snapshot models
//! - Error types with miette diagnostics
//! - Byte-quantity parsing and human-readable formatting

pub mod error;
pub mod models;
pub mod quantities;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use models::{Clone, CloneMetadata, Database, Snapshot, Status, StatusCode};
pub use quantities::{format_bytes, parse_ram};
