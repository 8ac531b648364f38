//! Failure classification for the query retry loop.
//!
//! Every [`ClientError`] maps to exactly one [`Classification`]. Anything the
//! tables below do not recognise is `Permanent`: the loop never retries blindly.
//!
//! ## Retryable
//!
//! Status codes:
//! - `CANCELLED`, `UNAVAILABLE`, `DEADLINE_EXCEEDED`, `RESOURCE_EXHAUSTED`
//! - `ABORTED`, `INTERNAL`, `UNKNOWN`
//!
//! Message signatures (malformed responses that only show up as text):
//! - response envelope without an HTTP `content-type` header
//! - `UNKNOWN` status with an empty message
//!
//! ## Permanent
//!
//! Everything else, including `UNAUTHENTICATED`, `INVALID_ARGUMENT` (bad SQL),
//! configuration errors, caller cancellation and decode errors.

use crate::error::ClientError;
use tonic::{Code, Status};

/// Outcome of classifying a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Permanent,
}

impl Classification {
    pub fn is_retryable(self) -> bool {
        self == Classification::Retryable
    }
}

/// Status codes treated as transient.
pub const RETRYABLE_CODES: &[Code] = &[
    Code::Cancelled,
    Code::Unavailable,
    Code::DeadlineExceeded,
    Code::ResourceExhausted,
    Code::Aborted,
    Code::Internal,
    Code::Unknown,
];

/// A retryable failure recognised by its message text alone.
#[derive(Debug, Clone, Copy)]
pub enum MessageRule {
    /// Message contains the given substring, any status code.
    Contains(&'static str),
    /// Status has the given code and an empty message.
    EmptyWithCode(Code),
}

impl MessageRule {
    pub fn matches(&self, status: &Status) -> bool {
        match self {
            MessageRule::Contains(needle) => status.message().contains(needle),
            MessageRule::EmptyWithCode(code) => {
                status.code() == *code && status.message().is_empty()
            }
        }
    }
}

/// Malformed-response signatures. Kept in one table so they can be tested
/// and swapped without touching the retry loop.
pub const MESSAGE_RULES: &[MessageRule] = &[
    MessageRule::Contains("malformed header: missing HTTP content-type"),
    MessageRule::EmptyWithCode(Code::Unknown),
];

/// Classify a gRPC status.
pub fn classify_status(status: &Status) -> Classification {
    if RETRYABLE_CODES.contains(&status.code())
        || MESSAGE_RULES.iter().any(|rule| rule.matches(status))
    {
        Classification::Retryable
    } else {
        Classification::Permanent
    }
}

/// Classify any client failure.
pub fn classify(err: &ClientError) -> Classification {
    match err {
        ClientError::Authentication(status) | ClientError::Transport(status) => {
            classify_status(status)
        }
        ClientError::Config(_)
        | ClientError::Connection { .. }
        | ClientError::Protocol(_)
        | ClientError::Stream(_)
        | ClientError::Cancelled
        | ClientError::Timeout(_)
        | ClientError::Http(_)
        | ClientError::HttpStatus { .. }
        | ClientError::Serialization(_)
        | ClientError::Closed => Classification::Permanent,
    }
}
