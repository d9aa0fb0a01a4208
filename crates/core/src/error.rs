//! Shared error taxonomy.
//!
//! Every crate in this workspace eventually converts its local error type into
//! this one via `From`, the same way `RagError`/`LlmError` converge into a
//! single core error in the teacher lineage this workspace is built from.

use thiserror::Error;

/// Which sliding-window budget a [`Error::RateLimited`] was denied against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKind {
    Requests,
    Budget,
}

/// The shared error taxonomy for the retrieval engine.
///
/// `Degraded` is deliberately absent: a degraded outcome is not a failure, it
/// is a result annotation (`Candidate::degraded` / `degraded_reason`), so it
/// never appears as an `Err` variant here.
#[derive(Error, Debug)]
pub enum Error {
    /// A precondition was violated (e.g. a filter built without a tenant id).
    /// Never caught internally; always surfaced to the caller.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Caller-supplied value out of range or malformed.
    #[error("bad input: {0}")]
    BadInput(String),

    /// A transient collaborator failure (vector store transport, embedder endpoint).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A bounded wait elapsed.
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// The sliding-window limiter denied the call.
    #[error("rate limited ({kind:?}), retry after {retry_after_secs}s")]
    RateLimited {
        kind: RateLimitKind,
        retry_after_secs: f64,
    },

    /// Collection or resource absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any otherwise-unclassified fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Error::Invariant(_) | Error::BadInput(_) | Error::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
