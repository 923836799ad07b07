//! Structured error types for pprofd
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Capture and parse failures end the request; symbolization failures are
//! reported inline; listener failures go to the configured error handler.

use super::types::CaptureKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("{0} capture already active")]
    AlreadyActive(CaptureKind),

    #[error("sampler failed: {0}")]
    Sampler(String),

    #[error("failed to encode capture: {0}")]
    Encode(String),

    #[error("capture task aborted: {0}")]
    Aborted(String),
}

impl CaptureError {
    /// True when the process-wide sampler was busy with another capture
    #[must_use]
    pub fn is_already_active(&self) -> bool {
        matches!(self, CaptureError::AlreadyActive(_))
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    Parse(String),

    #[error("pipeline task aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum SymbolizationError {
    #[error("symbol request to {endpoint} failed: {error}")]
    Request { endpoint: String, error: String },

    #[error("symbol endpoint {endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error(transparent)]
    Protocol(#[from] pprofd_common::ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Unknown profile: {0}")]
    Unknown(String),

    #[error("failed to write {name} profile: {error}")]
    Write { name: String, error: String },
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to resolve listen address {0}")]
    InvalidAddress(String),

    #[error("listener on {addr} failed: {error}")]
    Listener { addr: String, error: std::io::Error },

    #[error("failed to load TLS key pair ({cert}, {key}): {error}")]
    Tls { cert: String, key: String, error: std::io::Error },
}
