//! Domain model for pprofd
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{
    parse_flag, parse_int, CaptureKind, CaptureRequest, OutputFormat, Pid, ProfileReportOptions,
    Tid,
};

pub use errors::{CaptureError, PipelineError, ProfileError, ServerError, SymbolizationError};
