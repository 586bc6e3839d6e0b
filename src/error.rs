//! Typed error values for the coordination layer.
//!
//! Orchestration and configuration code uses `anyhow`; the enums here are the
//! errors callers need to match on (per-slide load failures, invalid state
//! transitions, resource misuse).

use thiserror::Error;

use crate::window::SlideState;

/// Failure of a single image load. Stored per slide, never propagated out of a batch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("gpu upload failed for {path}: {reason}")]
    Upload { path: String, reason: String },

    #[error("gave up on {path} after {attempts} attempts: {last}")]
    Exhausted {
        path: String,
        attempts: u32,
        last: Box<LoadError>,
    },
}

/// Rejected slide state transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("slide {index} cannot go from {from:?} to {to:?}")]
    InvalidTransition {
        index: usize,
        from: SlideState,
        to: SlideState,
    },

    #[error("slide index {index} out of range (count {count})")]
    OutOfRange { index: usize, count: usize },
}

/// Misuse of the resource ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("no async runtime available to arm timer")]
    NoRuntime,

    #[error("resource manager for instance '{0}' is already disposed")]
    Disposed(String),
}
