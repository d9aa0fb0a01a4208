//! Shared data model: the request/response vocabulary every retriever speaks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Search strategy requested by the caller, or `Auto` to let the hybrid
/// retriever's heuristic classifier decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Auto,
    Dense,
    Sparse,
    Hybrid,
}

/// One of the predefined reranker variants, ordered roughly by cost and
/// quality: fast < accurate ≈ code < colbert < llm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankerTier {
    Fast,
    Accurate,
    Code,
    Colbert,
    Llm,
}

impl std::fmt::Display for RerankerTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RerankerTier::Fast => "fast",
            RerankerTier::Accurate => "accurate",
            RerankerTier::Code => "code",
            RerankerTier::Colbert => "colbert",
            RerankerTier::Llm => "llm",
        };
        write!(f, "{s}")
    }
}

/// Closed-inclusive timestamp range, used by the filter builder's optional
/// `time_range` predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

/// Raw, caller-supplied filter fields, before they pass through the filter
/// builder. Unlike [`StoreFilter`], this carries no invariant: tenant_id may
/// be empty or missing, which the builder rejects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFilters {
    pub tenant_id: Option<String>,
    pub session_id: Option<String>,
    pub r#type: Option<String>,
    pub time_range: Option<TimeRange>,
}

impl RawFilters {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Default::default()
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_type(mut self, r#type: impl Into<String>) -> Self {
        self.r#type = Some(r#type.into());
        self
    }

    pub fn with_time_range(mut self, start: i64, end: i64) -> Self {
        self.time_range = Some(TimeRange { start, end });
        self
    }
}

/// A single equality or range predicate in a built filter's conjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Equals { field: String, value: String },
    Range { field: String, start: i64, end: i64 },
}

/// The output of the filter builder (§4.F). Invariant: `predicates[0]` is
/// always the tenant-id equality predicate, and it appears exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreFilter {
    predicates: Vec<Predicate>,
}

impl StoreFilter {
    /// Only the filter builder constructs these; see `memsearch_retrieval::filter`.
    pub(crate) fn from_predicates(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn tenant_id(&self) -> &str {
        match &self.predicates[0] {
            Predicate::Equals { field, value } if field == "tenant_id" => value,
            _ => unreachable!("StoreFilter invariant: first predicate is always tenant_id"),
        }
    }
}

/// Immutable retrieval request. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub limit: usize,
    pub threshold: Option<f32>,
    pub filters: RawFilters,
    pub strategy: Strategy,
    pub rerank: bool,
    pub rerank_tier: Option<RerankerTier>,
    pub rerank_depth: Option<usize>,
}

impl Query {
    pub fn new(text: impl Into<String>, limit: usize, tenant_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit,
            threshold: None,
            filters: RawFilters::tenant(tenant_id),
            strategy: Strategy::Auto,
            rerank: false,
            rerank_tier: None,
            rerank_depth: None,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_rerank(mut self, tier: RerankerTier) -> Self {
        self.rerank = true;
        self.rerank_tier = Some(tier);
        self
    }

    pub fn with_filters(mut self, filters: RawFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// A single row returned from the vector store, accumulating scores as it
/// passes through fusion and reranking stages. Immutable except for the
/// monotonic addition of later-stage scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub primary_score: f32,
    pub channel_ranks: HashMap<String, usize>,
    pub rrf_score: Option<f32>,
    pub reranker_score: Option<f32>,
    pub rerank_tier: Option<RerankerTier>,
    pub payload: HashMap<String, String>,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, primary_score: f32) -> Self {
        Self {
            id: id.into(),
            primary_score,
            channel_ranks: HashMap::new(),
            rrf_score: None,
            reranker_score: None,
            rerank_tier: None,
            payload: HashMap::new(),
            degraded: false,
            degraded_reason: None,
        }
    }

    /// The score used for ranking purposes: the most recently computed of
    /// {reranker score, RRF score, primary score}, in that precedence order.
    pub fn final_score(&self) -> f32 {
        self.reranker_score
            .or(self.rrf_score)
            .unwrap_or(self.primary_score)
    }

    pub fn mark_degraded(&mut self, reason: impl Into<String>) {
        self.degraded = true;
        self.degraded_reason = Some(reason.into());
    }
}

/// An ordered sequence of Candidates sorted by final score descending.
pub type RankedList = Vec<Candidate>;

/// An ordered sequence of Candidates produced by a single channel for a
/// single query variant, before fusion.
pub type ChannelResultSet = Vec<Candidate>;

/// Stage-1 output of the session-aware retriever. Transient within a single
/// `retrieve()` call; never cached across requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHit {
    pub session_id: String,
    pub summary: String,
    pub score: f32,
    pub topics: Vec<String>,
    pub entities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_final_score_precedence() {
        let mut c = Candidate::new("a", 0.5);
        assert_eq!(c.final_score(), 0.5);
        c.rrf_score = Some(0.8);
        assert_eq!(c.final_score(), 0.8);
        c.reranker_score = Some(0.95);
        assert_eq!(c.final_score(), 0.95);
    }

    #[test]
    fn query_builder_defaults() {
        let q = Query::new("hello", 10, "tenant-a");
        assert_eq!(q.strategy, Strategy::Auto);
        assert!(!q.rerank);
        assert_eq!(q.filters.tenant_id.as_deref(), Some("tenant-a"));
    }
}
