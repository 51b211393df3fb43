//! Error types for the CRM client.
//!
//! # Design
//! A raised call failure is a `CallFailure` carrying its category, the remote
//! status or transport code, and the raw response, so a caller treating the
//! failure as fatal can still inspect what the server said. Protocol
//! violations are a separate variant because they are never suppressible.

use std::fmt;

use thiserror::Error;

use crate::http::{HttpMethod, HttpResponse};
use crate::suppress::Category;

/// Errors returned by `CrmClient`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A classified failure that the active suppression policy did not hide.
    #[error("{0}")]
    Call(Box<CallFailure>),

    /// The response contradicts the documented list envelope or entity shape.
    #[error("protocol violation on {resource}: {violation}")]
    Protocol {
        resource: String,
        violation: ProtocolViolation,
    },

    /// The request payload or cursor state could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// `get_entities_next_batch` was called before any list was fetched.
    #[error("no list fetch in progress")]
    NoCursor,

    /// Imported cursor state could not be decoded or is inconsistent.
    #[error("invalid cursor state: {0}")]
    InvalidCursor(String),
}

impl ApiError {
    pub fn category(&self) -> Option<Category> {
        match self {
            ApiError::Call(failure) => Some(failure.category),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Call(failure) => failure.status,
            _ => None,
        }
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            ApiError::Call(failure) => failure.response.as_ref(),
            _ => None,
        }
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, ApiError::Protocol { .. })
    }
}

/// Everything known about one failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub category: Category,
    pub method: HttpMethod,
    pub resource: String,
    /// Remote status, absent for transport failures and rejected requests.
    pub status: Option<u16>,
    /// Transport code, present only for transport failures.
    pub transport_code: Option<String>,
    pub message: String,
    pub response: Option<HttpResponse>,
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} failed ({})", self.method, self.resource, self.category)?;
        if let Some(status) = self.status {
            write!(f, " HTTP {status}")?;
        }
        if let Some(code) = &self.transport_code {
            write!(f, " [{code}]")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Ways a response can contradict the list envelope or entity conventions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("expected an envelope object, got {0}")]
    NotAnEnvelope(&'static str),

    #[error("envelope field `{0}` is missing or not a non-negative integer")]
    BadEnvelopeField(&'static str),

    #[error("envelope `data` is missing or not an array")]
    MissingData,

    #[error("count {count} does not match {len} data records")]
    CountMismatch { count: u64, len: usize },

    #[error("start {actual} does not match requested start {expected}")]
    StartMismatch { expected: u64, actual: u64 },

    #[error("count {count} exceeds limit {limit}")]
    CountExceedsLimit { count: u64, limit: u64 },

    #[error("start {start} + count {count} exceeds total {total}")]
    BeyondTotal { start: u64, count: u64, total: u64 },

    #[error("start {start} + count {count} overflows the offset range")]
    OffsetOverflow { start: u64, count: u64 },

    #[error("page ends at {next_start}, past the known total {total}")]
    PastKnownTotal { next_start: u64, total: u64 },

    #[error("empty page at {start} while total is {total}")]
    StalledPage { start: u64, total: u64 },

    #[error("record {index} is not an object")]
    RecordNotObject { index: usize },

    #[error("record {index} has no `id` or `ID`")]
    MissingIdentifier { index: usize },

    #[error("entity has no `id` or `ID`")]
    EntityWithoutIdentifier,

    #[error("embedded list `{0}` is missing")]
    MissingEmbeddedList(String),

    #[error("embedded list holds {count} of {total} records")]
    IncompleteEmbeddedList { count: u64, total: u64 },

    #[error("embedded list is full at limit {limit} without a total")]
    UnboundedEmbeddedList { limit: u64 },
}

/// A field spec could not be built from its declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldSpecError {
    #[error("unknown field type '{0}'")]
    UnknownFieldType(String),

    #[error("invalid field settings: {0}")]
    InvalidSettings(String),
}
