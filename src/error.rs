//! Error types for stream slicing.
//!
//! The slicer distinguishes three failure classes:
//!
//! - **Corruption**: malformed or truncated frame data, an unparsable declared
//!   length, or a transport I/O failure mid-read. Fatal to the session; the
//!   worker loop stops and the error is attached to the session outcome.
//! - **Protocol**: a payload-bearing header block without a usable
//!   `Content-Length`. Fatal, handled like corruption.
//! - **Usage**: API misuse such as starting an already-started engine or
//!   requesting a zero-length read. Rejected synchronously at the call site
//!   and never affects a running session.
//!
//! Reaching the end of the stream at a frame boundary is *not* an error: the
//! worker stops silently and the session outcome carries no error.
//!
//! ```rust
//! use framesaw::SliceError;
//!
//! let err = SliceError::protocol("header block without Content-Length");
//! assert!(err.is_fatal());
//! assert!(!err.is_usage());
//! ```

use thiserror::Error;

/// Result type alias for slicing operations.
pub type Result<T, E = SliceError> = std::result::Result<T, E>;

/// Main error type for the slicing engine and its collaborators.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SliceError {
    /// Malformed or truncated frame data, or an I/O failure mid-read.
    #[error("corrupt stream data: {context}")]
    Corruption {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The stream violated the multipart framing contract.
    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    /// The caller violated an API precondition.
    #[error("invalid use of slicer: {reason}")]
    Usage { reason: String },

    /// Transport acquisition failed.
    #[error("failed to connect to camera: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl SliceError {
    /// Returns whether this error terminates the session it occurred in.
    ///
    /// Usage errors are rejected at the call site and leave a running
    /// session untouched; everything else is fatal to its session.
    pub fn is_fatal(&self) -> bool {
        !self.is_usage()
    }

    /// Returns whether this error is a synchronous API usage error.
    pub fn is_usage(&self) -> bool {
        matches!(self, SliceError::Usage { .. })
    }

    /// Helper constructor for data corruption without an underlying cause.
    pub fn corruption(context: impl Into<String>) -> Self {
        SliceError::Corruption { context: context.into(), source: None }
    }

    /// Helper constructor for data corruption caused by an I/O error.
    pub fn corruption_with_source(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        SliceError::Corruption { context: context.into(), source: Some(source.into()) }
    }

    /// Helper constructor for a payload that ended before its declared length.
    pub fn truncated_payload(got: usize, expected: usize) -> Self {
        SliceError::corruption(format!(
            "truncated payload: stream ended after {got} of {expected} bytes"
        ))
    }

    /// Helper constructor for protocol violations.
    pub fn protocol(reason: impl Into<String>) -> Self {
        SliceError::Protocol { reason: reason.into() }
    }

    /// Helper constructor for usage errors.
    pub fn usage(reason: impl Into<String>) -> Self {
        SliceError::Usage { reason: reason.into() }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        SliceError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with an underlying cause.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        SliceError::Connection { reason: reason.into(), source: Some(source.into()) }
    }
}
