//! Error taxonomy for remote calls.
//!
//! Every failure surfaced by the stack is classified exactly once into an
//! [`ErrorKind`] before anyone decides whether to retry it. The kind, the raw
//! payload and the verified remote timestamp (when one was obtained) travel
//! together so callers can render a precise message without re-deriving
//! context.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CallError>;

/// Classification of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Unauthenticated or forbidden. Never retried.
    AuthFailure,
    /// The remote program explicitly rejected the call. Never retried.
    ApplicationReject,
    /// The remote program aborted execution. Never retried.
    ApplicationTrap,
    /// Network failure or ambiguous status. Retried for read-only calls.
    Transient,
    /// Ledger and aggregator disagree beyond tolerance. Always fatal.
    ConsistencyViolation,
    /// A poll loop or deadline was exhausted without a conclusive answer.
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AuthFailure => "auth failure",
            Self::ApplicationReject => "application reject",
            Self::ApplicationTrap => "application trap",
            Self::Transient => "transient",
            Self::ConsistencyViolation => "consistency violation",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Reject code attached by the remote system to a refused call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectCode {
    SysFatal,
    SysTransient,
    DestinationInvalid,
    CanisterReject,
    CanisterError,
    Unknown(u64),
}

impl RejectCode {
    pub fn from_code(code: u64) -> Self {
        match code {
            1 => Self::SysFatal,
            2 => Self::SysTransient,
            3 => Self::DestinationInvalid,
            4 => Self::CanisterReject,
            5 => Self::CanisterError,
            other => Self::Unknown(other),
        }
    }

    /// Taxonomy bucket for this reject code.
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::CanisterReject => ErrorKind::ApplicationReject,
            Self::CanisterError => ErrorKind::ApplicationTrap,
            _ => ErrorKind::Transient,
        }
    }
}

/// Structured rejection payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectInfo {
    pub code: RejectCode,
    pub message: String,
}

/// A classified call failure.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
    /// Rejection details, when the remote system refused the call outright.
    pub reject: Option<RejectInfo>,
    /// Verified remote timestamp of the failing attempt, when one was read.
    pub timestamp: Option<Timestamp>,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            reject: None,
            timestamp: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailure, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConsistencyViolation, message)
    }

    /// Build from a remote reject code and message.
    pub fn rejected(code: u64, message: impl Into<String>) -> Self {
        let code = RejectCode::from_code(code);
        let message = message.into();
        Self {
            kind: code.kind(),
            message: message.clone(),
            reject: Some(RejectInfo { code, message }),
            timestamp: None,
        }
    }

    /// Classify an HTTP transport status. 401/403 are authentication
    /// failures; everything else at the transport level is transient.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::AuthFailure,
            _ => ErrorKind::Transient,
        };
        Self::new(kind, message)
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Whether the retry executor may attempt this call again.
    pub fn retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}
