//! Error taxonomy for the HE core.
//!
//! Every fallible operation in the crate returns [`HeError`]. Callers at the
//! HTTP boundary translate errors with [`HeError::status_code`].

use thiserror::Error;

use crate::pipeline::JobId;
use crate::store::Handle;

/// Errors produced by context management, encoding, compute and the pipeline.
#[derive(Debug, Error)]
pub enum HeError {
    /// Bad or insecure configuration. Fatal to initialization.
    #[error("invalid parameters: {0}")]
    Parameter(String),

    /// Input outside the encodable range or precision.
    #[error("value out of range: {0}")]
    Range(String),

    /// The operation would consume more levels than the modulus chain has.
    #[error("modulus chain depth exceeded: {0}")]
    DepthExceeded(String),

    /// Unknown or already released ciphertext handle.
    #[error("ciphertext handle {0} not found")]
    NotFound(Handle),

    /// Handle or ciphertext from a context that has been torn down.
    #[error("stale context: {0}")]
    StaleContext(String),

    /// No context has been initialized yet.
    #[error("HE context is not initialized")]
    NotInitialized,

    /// Data created under a different live context.
    #[error("context mismatch: {0}")]
    ContextMismatch(String),

    /// Operands that cannot be combined (scale, size).
    #[error("operand mismatch: {0}")]
    OperandMismatch(String),

    /// Malformed request arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown document job.
    #[error("job {0} not found")]
    JobNotFound(JobId),

    /// The pipeline is draining for re-initialization.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// A composed operation failed after storing intermediate results.
    ///
    /// The intermediates stay in the store until the caller releases them.
    #[error("{source} ({} intermediate handles left in store)", .intermediates.len())]
    Partial {
        intermediates: Vec<Handle>,
        #[source]
        source: Box<HeError>,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse error classes understood by the HTTP collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 400-class: the request or configuration is wrong.
    InvalidInput,
    /// 404-class.
    NotFound,
    /// 409-class: handle or context lifecycle misuse.
    Conflict,
    /// 503-class.
    Unavailable,
    /// 500-class.
    Internal,
}

impl HeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            HeError::Parameter(_)
            | HeError::Range(_)
            | HeError::DepthExceeded(_)
            | HeError::ContextMismatch(_)
            | HeError::OperandMismatch(_)
            | HeError::InvalidArgument(_) => ErrorClass::InvalidInput,
            HeError::NotFound(_) | HeError::JobNotFound(_) => ErrorClass::NotFound,
            HeError::StaleContext(_) | HeError::NotInitialized => ErrorClass::Conflict,
            HeError::Unavailable(_) => ErrorClass::Unavailable,
            HeError::Partial { source, .. } => source.class(),
            HeError::Io(_) | HeError::Serialization(_) | HeError::Internal(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::InvalidInput => 400,
            ErrorClass::NotFound => 404,
            ErrorClass::Conflict => 409,
            ErrorClass::Unavailable => 503,
            ErrorClass::Internal => 500,
        }
    }

    /// The innermost error, looking through [`HeError::Partial`].
    pub fn root(&self) -> &HeError {
        match self {
            HeError::Partial { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for HE operations.
pub type Result<T> = std::result::Result<T, HeError>;

/// Create a [`HeError::Parameter`] with format string support.
macro_rules! param_err {
    ($($arg:tt)*) => {
        $crate::error::HeError::Parameter(format!($($arg)*))
    };
}

pub(crate) use param_err;
