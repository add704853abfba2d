//! Error types for Flux
//!
//! Every failure is a [`ComputeError`]. The C boundary reports failures by
//! [`ErrorKind`], so each variant maps to exactly one kind.

use thiserror::Error;

/// Failure category reported across the C boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    /// Bad argument: timezone, device id, null or non-UTF-8 string, vendor
    Validation = 1,
    /// Input does not parse or does not match the expected shape
    Format = 2,
    /// Operation against a handle or buffer in the wrong lifecycle state
    State = 3,
    /// Resource exhaustion or output serialization failure
    Allocation = 4,
}

impl ErrorKind {
    /// Numeric code returned by `flux_last_error_kind`
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Format => "format",
            ErrorKind::State => "state",
            ErrorKind::Allocation => "allocation",
        }
    }
}

/// Errors that can occur during computation
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse vendor payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Invalid baseline snapshot: {0}")]
    BaselineFormat(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Allocation failed: {0}")]
    AllocationFailure(String),

    #[error("Invalid processor handle: {0}")]
    InvalidHandle(String),

    #[error("Invalid string release: {0}")]
    InvalidRelease(String),

    #[error("Unsupported vendor: {0}")]
    UnsupportedVendor(String),
}

impl ComputeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ComputeError::ParseError(_)
            | ComputeError::JsonError(_)
            | ComputeError::DateParseError(_)
            | ComputeError::BaselineFormat(_) => ErrorKind::Format,
            ComputeError::InvalidTimezone(_)
            | ComputeError::InvalidDeviceId(_)
            | ComputeError::InvalidArgument(_)
            | ComputeError::UnsupportedVendor(_) => ErrorKind::Validation,
            ComputeError::InvalidHandle(_) | ComputeError::InvalidRelease(_) => ErrorKind::State,
            ComputeError::EncodingError(_) | ComputeError::AllocationFailure(_) => {
                ErrorKind::Allocation
            }
        }
    }
}
