//! Shared error taxonomy, data model, and filter builder for the memsearch
//! retrieval engine.

pub mod error;
pub mod filter;
pub mod model;

pub use error::{Error, RateLimitKind, Result};
pub use model::{
    Candidate, ChannelResultSet, Predicate, Query, RankedList, RawFilters, RerankerTier,
    SessionHit, Strategy, StoreFilter, TimeRange,
};
