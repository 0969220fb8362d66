//! Error classification shared by every operation.
//!
//! Each operation has its own `thiserror` enum; all of them map onto
//! [`ErrorKind`] so the HTTP layer and the logs can treat them uniformly.

use serde::Serialize;
use thiserror::Error;

/// Coarse category of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The caller sent something malformed or out of range
    Validation,
    /// The referenced entity does not exist
    NotFound,
    /// The request is well-formed but loses against current state
    Conflict,
    /// A dependency is temporarily unreachable; retrying may succeed
    Transient,
    /// Something that must never happen did
    InvariantViolation,
}

/// Failure reported by a store implementation.
///
/// Conflicts the store can classify (stale rows, duplicate codes) are returned
/// as typed outcomes, not errors; this covers everything else.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend could not be reached or the query failed
    #[error("store backend error: {0}")]
    Backend(String),

    /// A persisted row could not be mapped back into a domain value
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// A lock guarding the in-memory tables was poisoned by a panicking thread
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Error category. Backend failures (lost connections, pool timeouts)
    /// are retryable; the rest are not.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Backend(_) => ErrorKind::Transient,
            Self::Corrupt(_) | Self::Poisoned => ErrorKind::InvariantViolation,
        }
    }
}
