//! Typed error kinds for the wire engine and the coordination arbiter.
//!
//! Domain code returns these; the CLI and other outer glue layers wrap them
//! in `anyhow::Result` the way `main.rs`/`cli.rs` wrap `benchmark.rs` errors.

use thiserror::Error;

/// Errors surfaced by the NSXPC wire engine (codec, connection, proxy table,
/// progress bridge).
#[derive(Debug, Error)]
pub enum NsxpcError {
    #[error("connection is invalid and can no longer be used")]
    ConnectionInvalid,

    #[error("connection was interrupted")]
    ConnectionInterrupted,

    #[error("peer is unavailable")]
    PeerUnavailable,

    #[error("operation timed out")]
    Timeout,

    #[error("refused to decode disallowed class `{class}` for argument `{argument}`")]
    InsecureDecode { class: String, argument: String },

    #[error("malformed wire data: {reason}")]
    MalformedWire { reason: String },

    #[error("unknown selector `{selector}`")]
    UnknownSelector { selector: String },

    #[error("remote threw {domain} error {code}: {message}")]
    ExceptionOnRemote {
        domain: String,
        code: i64,
        message: String,
    },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("invariant violated: {detail}")]
    InvariantViolation { detail: String },
}

impl NsxpcError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        NsxpcError::MalformedWire {
            reason: reason.into(),
        }
    }

    pub fn invariant(detail: impl Into<String>) -> Self {
        NsxpcError::InvariantViolation {
            detail: detail.into(),
        }
    }
}

/// Errors surfaced by the FileCoordination arbiter.
#[derive(Debug, Error)]
pub enum FcError {
    #[error("operation denied: {reason}")]
    OperationDenied { reason: String },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("unknown cancellation token")]
    UnknownToken,

    #[error("invalid coordination path")]
    InvalidPath,

    #[error("request never reached the head of its queue")]
    Timeout,
}

pub type NsxpcResult<T> = Result<T, NsxpcError>;
pub type FcResult<T> = Result<T, FcError>;
