//! CSI error types.
//!
//! All errors in the `libcsi` crate are represented by the [`CsiError`] enum,
//! which derives [`thiserror::Error`] for ergonomic error handling and also
//! implements [`Serialize`]/[`Deserialize`] so errors can travel across the
//! socket transport.  Every variant maps onto a gRPC-compatible [`Code`] so an
//! orchestrator can tell a permanent rejection from a transient failure.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status codes carried by [`CsiError`].
///
/// Numeric values match the gRPC status code table, which is what CSI
/// sidecars reason about when deciding whether to retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    /// Client specified an invalid argument.
    InvalidArgument = 3,
    /// Deadline expired before the operation could complete.
    DeadlineExceeded = 4,
    /// Some requested entity was not found.
    NotFound = 5,
    /// Operation was attempted past the valid range.
    OutOfRange = 11,
    /// Operation is not implemented or not supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
}

impl Code {
    /// Upper-snake name as used by gRPC tooling, e.g. `OUT_OF_RANGE`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Code> for i32 {
    fn from(code: Code) -> i32 {
        code as i32
    }
}

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CsiError {
    /// The caller supplied an invalid or missing argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A requested quantity is outside the range the driver accepts.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The verb or feature is permanently unsupported by this plugin.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// The plugin cannot currently serve the request.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The per-call deadline elapsed before the call completed.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// A transport endpoint string could not be parsed.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// A socket / framing level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// An unclassified internal error (filesystem or subprocess failure).
    #[error("internal error: {0}")]
    Internal(String),
}

impl CsiError {
    /// Status code reported to the caller for this error.
    #[must_use]
    pub const fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) | Self::InvalidEndpoint(_) => Code::InvalidArgument,
            Self::NotFound(_) => Code::NotFound,
            Self::OutOfRange(_) => Code::OutOfRange,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::Unavailable(_) | Self::TransportError(_) => Code::Unavailable,
            Self::DeadlineExceeded(_) => Code::DeadlineExceeded,
            Self::Internal(_) => Code::Internal,
        }
    }

    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`CsiError::Unimplemented`] naming the unsupported verb.
    pub fn unimplemented(verb: &str) -> Self {
        Self::Unimplemented(format!("{verb} is not implemented"))
    }
}
