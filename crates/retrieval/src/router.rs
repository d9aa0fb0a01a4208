//! Reranker tier routing (component E).
//!
//! Selects and invokes one of the five reranker tiers, racing each call
//! against a timeout, falling back at most one hop on failure, and
//! synthesizing uniform scores as the last resort so callers never see a
//! hard error out of reranking itself — only a degraded result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use memsearch_config::RerankerRouterConfig;
use memsearch_core::{Error, RerankerTier};
use memsearch_llm::LlmBackend;

use crate::embeddings::EmbedderFactory;
use crate::rate_limiter::SlidingWindowLimiter;
use crate::reranker::{AccurateReranker, CodeReranker, ColbertReranker, FastReranker, LlmReranker, RerankerBackend};

fn parse_tier(s: &str) -> Option<RerankerTier> {
    match s {
        "fast" => Some(RerankerTier::Fast),
        "accurate" => Some(RerankerTier::Accurate),
        "code" => Some(RerankerTier::Code),
        "colbert" => Some(RerankerTier::Colbert),
        "llm" => Some(RerankerTier::Llm),
        _ => None,
    }
}

/// Outcome of one `rerank` call, carrying whether the router had to fall
/// back or gave up and synthesized uniform scores.
#[derive(Debug, Clone)]
pub struct RouterResult {
    pub scores: Vec<f32>,
    pub tier_used: RerankerTier,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
}

/// Lazily constructs and caches one backend per tier, routes calls with a
/// per-call timeout, and falls back a single hop on failure before
/// synthesizing uniform scores.
pub struct RerankerRouter {
    config: RerankerRouterConfig,
    embedder_factory: Arc<EmbedderFactory>,
    llm_backend: Option<Arc<dyn LlmBackend>>,
    llm_limiter: Option<Arc<SlidingWindowLimiter>>,
    backends: Mutex<HashMap<RerankerTier, Arc<dyn RerankerBackend>>>,
}

impl RerankerRouter {
    pub fn new(
        config: RerankerRouterConfig,
        embedder_factory: Arc<EmbedderFactory>,
        llm_backend: Option<Arc<dyn LlmBackend>>,
        llm_limiter: Option<Arc<SlidingWindowLimiter>>,
    ) -> Self {
        Self {
            config,
            embedder_factory,
            llm_backend,
            llm_limiter,
            backends: Mutex::new(HashMap::new()),
        }
    }

    fn default_tier(&self) -> RerankerTier {
        parse_tier(&self.config.default_tier).unwrap_or(RerankerTier::Fast)
    }

    fn fallback_tier(&self) -> Option<RerankerTier> {
        self.config
            .default_fallback_tier
            .as_deref()
            .and_then(|s| parse_tier(s))
    }

    fn backend_for(&self, tier: RerankerTier) -> Result<Arc<dyn RerankerBackend>, Error> {
        let mut backends = self.backends.lock();
        if let Some(existing) = backends.get(&tier) {
            return Ok(Arc::clone(existing));
        }

        tracing::debug!(?tier, "loading reranker backend");
        let backend: Arc<dyn RerankerBackend> = match tier {
            RerankerTier::Fast => Arc::new(FastReranker),
            RerankerTier::Accurate => Arc::new(AccurateReranker),
            RerankerTier::Code => Arc::new(CodeReranker),
            RerankerTier::Colbert => Arc::new(ColbertReranker::new(&self.embedder_factory)),
            RerankerTier::Llm => {
                let llm = self
                    .llm_backend
                    .clone()
                    .ok_or_else(|| Error::Invariant("llm tier requested with no llm backend configured".to_string()))?;
                Arc::new(LlmReranker::new(llm, self.config.llm_doc_char_budget))
            }
        };
        backends.insert(tier, Arc::clone(&backend));
        Ok(backend)
    }

    /// Rerank `documents` against `query` using `tier`, racing the call
    /// against `default_timeout_ms`. On any failure — construction error,
    /// timeout, or scoring error — falls back one hop to the configured
    /// fallback tier (if any and if `allow_fallback`), and if that also
    /// fails, synthesizes uniform 0.5 scores rather than propagating an
    /// error: reranking never fails the overall search.
    pub async fn rerank(
        &self,
        tier: RerankerTier,
        query: &str,
        documents: &[(String, String)],
    ) -> RouterResult {
        self.rerank_inner(tier, query, documents, true).await
    }

    pub async fn rerank_default(&self, query: &str, documents: &[(String, String)]) -> RouterResult {
        self.rerank(self.default_tier(), query, documents).await
    }

    async fn rerank_inner(
        &self,
        tier: RerankerTier,
        query: &str,
        documents: &[(String, String)],
        allow_fallback: bool,
    ) -> RouterResult {
        if documents.is_empty() {
            return RouterResult {
                scores: Vec::new(),
                tier_used: tier,
                degraded: false,
                degraded_reason: None,
            };
        }

        if tier == RerankerTier::Llm {
            if let Some(limiter) = &self.llm_limiter {
                let estimated_tokens: u64 = documents
                    .iter()
                    .map(|(_, text)| (text.len() as u64 / 4).max(1))
                    .sum();
                let cost = estimated_tokens as f64 * self.config.llm_cost_per_token;
                if let Err(err) = limiter.check_and_record(cost) {
                    return self
                        .fallback_or_uniform(tier, query, documents, allow_fallback, err.to_string())
                        .await;
                }
            }
        }

        let backend = match self.backend_for(tier) {
            Ok(b) => b,
            Err(err) => {
                return self
                    .fallback_or_uniform(tier, query, documents, allow_fallback, err.to_string())
                    .await
            }
        };

        let timeout = Duration::from_millis(self.config.default_timeout_ms);
        let outcome = tokio::time::timeout(timeout, backend.score(query, documents)).await;

        match outcome {
            Ok(Ok(scores)) => RouterResult {
                scores,
                tier_used: tier,
                degraded: false,
                degraded_reason: None,
            },
            Ok(Err(err)) => {
                self.fallback_or_uniform(tier, query, documents, allow_fallback, err.to_string())
                    .await
            }
            Err(_) => {
                self.fallback_or_uniform(
                    tier,
                    query,
                    documents,
                    allow_fallback,
                    format!("tier {} timed out after {}ms", tier, self.config.default_timeout_ms),
                )
                .await
            }
        }
    }

    async fn fallback_or_uniform(
        &self,
        failed_tier: RerankerTier,
        query: &str,
        documents: &[(String, String)],
        allow_fallback: bool,
        reason: String,
    ) -> RouterResult {
        if allow_fallback {
            if let Some(fallback) = self.fallback_tier() {
                if fallback != failed_tier {
                    tracing::warn!(
                        from = %failed_tier,
                        to = %fallback,
                        %reason,
                        "reranker tier failed, falling back"
                    );
                    let mut result = Box::pin(self.rerank_inner(fallback, query, documents, false)).await;
                    result.degraded = true;
                    result.degraded_reason = Some(format!(
                        "tier {} failed ({reason}), fell back to {}",
                        failed_tier,
                        fallback
                    ));
                    return result;
                }
            }
        }

        tracing::warn!(tier = %failed_tier, %reason, "reranker tier failed with no further fallback, synthesizing uniform scores");
        RouterResult {
            scores: vec![0.5; documents.len()],
            tier_used: failed_tier,
            degraded: true,
            degraded_reason: Some(format!(
                "tier {} failed with no further fallback ({reason})",
                failed_tier
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> RerankerRouter {
        let config = RerankerRouterConfig {
            default_timeout_ms: 5_000,
            default_tier: "fast".to_string(),
            default_fallback_tier: Some("fast".to_string()),
            llm_doc_char_budget: 500,
            llm_cost_per_token: 1.0,
        };
        RerankerRouter::new(config, Arc::new(EmbedderFactory::new(64, 16)), None, None)
    }

    #[tokio::test]
    async fn fast_tier_succeeds_without_fallback() {
        let router = router();
        let result = router
            .rerank(
                RerankerTier::Fast,
                "gold loan",
                &[("a".to_string(), "gold loan rates".to_string())],
            )
            .await;
        assert!(!result.degraded);
        assert_eq!(result.tier_used, RerankerTier::Fast);
    }

    #[tokio::test]
    async fn llm_tier_without_backend_falls_back_to_fast() {
        let router = router();
        let result = router
            .rerank(
                RerankerTier::Llm,
                "query",
                &[("a".to_string(), "some document".to_string())],
            )
            .await;
        assert!(result.degraded);
        assert_eq!(result.tier_used, RerankerTier::Fast);
    }

    #[tokio::test]
    async fn fallback_equal_to_failed_tier_synthesizes_uniform_scores() {
        let config = RerankerRouterConfig {
            default_timeout_ms: 5_000,
            default_tier: "llm".to_string(),
            default_fallback_tier: Some("llm".to_string()),
            llm_doc_char_budget: 500,
            llm_cost_per_token: 1.0,
        };
        let router = RerankerRouter::new(config, Arc::new(EmbedderFactory::new(64, 16)), None, None);
        let result = router
            .rerank(
                RerankerTier::Llm,
                "query",
                &[("a".to_string(), "doc".to_string()), ("b".to_string(), "doc2".to_string())],
            )
            .await;
        assert!(result.degraded);
        assert_eq!(result.scores, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn empty_documents_short_circuits_without_touching_rate_limiter() {
        let limiter = Arc::new(SlidingWindowLimiter::new(0, 0.0, Duration::from_secs(60)));
        let config = RerankerRouterConfig {
            default_timeout_ms: 5_000,
            default_tier: "llm".to_string(),
            default_fallback_tier: None,
            llm_doc_char_budget: 500,
            llm_cost_per_token: 1.0,
        };
        let router = RerankerRouter::new(config, Arc::new(EmbedderFactory::new(64, 16)), None, Some(limiter));
        let result = router.rerank(RerankerTier::Llm, "query", &[]).await;
        assert!(result.scores.is_empty());
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn backend_is_cached_across_calls() {
        let router = router();
        router
            .rerank(RerankerTier::Fast, "a", &[("x".to_string(), "y".to_string())])
            .await;
        assert_eq!(router.backends.lock().len(), 1);
        router
            .rerank(RerankerTier::Fast, "a", &[("x".to_string(), "y".to_string())])
            .await;
        assert_eq!(router.backends.lock().len(), 1);
    }
}
