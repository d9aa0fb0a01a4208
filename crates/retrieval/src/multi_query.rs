//! LLM query expansion + parallel retrieval + RRF fusion (component H).
//!
//! Wraps the hybrid retriever: asks an LLM for paraphrase/keyword/etc.
//! variants of the query, fans out one hybrid search per variant, and
//! fuses the N result sets with the same RRF formula used for channel
//! fusion. Any failure in the expansion step degrades to a single search
//! against the original query text rather than failing the whole call.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use memsearch_config::MultiQueryConfig;
use memsearch_core::{Candidate, Error, Query, RankedList};
use memsearch_llm::{LlmBackend, LlmConfig, Message};

use crate::hybrid::HybridRetriever;
use crate::rate_limiter::SlidingWindowLimiter;

const EXPANSION_SYSTEM_PROMPT: &str = "You generate alternative phrasings of a search query to \
improve retrieval recall. Always respond with a JSON object of the shape \
{\"queries\": [\"...\", \"...\"]} and nothing else.";

#[derive(Deserialize)]
struct ExpansionResponse {
    queries: Vec<String>,
}

const EXPANSION_FAILED_REASON: &str = "multi_query_expansion_failed";

pub struct MultiQueryRetriever {
    hybrid: Arc<HybridRetriever>,
    llm: Option<Arc<dyn LlmBackend>>,
    limiter: Option<Arc<SlidingWindowLimiter>>,
    config: MultiQueryConfig,
}

impl MultiQueryRetriever {
    pub fn new(
        hybrid: Arc<HybridRetriever>,
        llm: Option<Arc<dyn LlmBackend>>,
        limiter: Option<Arc<SlidingWindowLimiter>>,
        config: MultiQueryConfig,
    ) -> Self {
        Self {
            hybrid,
            llm,
            limiter,
            config,
        }
    }

    pub async fn search(&self, query: &Query) -> Result<RankedList, Error> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let (variants, degraded_reason) = self.expand_queries(query).await;
        let per_variant_limit = (query.limit * 2).max(20);

        let searches = variants.iter().map(|text| {
            let mut variant_query = query.clone();
            variant_query.text = text.clone();
            variant_query.limit = per_variant_limit;
            let hybrid = Arc::clone(&self.hybrid);
            async move { hybrid.search(&variant_query).await }
        });

        let results = futures::future::join_all(searches).await;
        let ranked_lists: Vec<RankedList> = results.into_iter().filter_map(Result::ok).collect();

        let mut fused = fuse_ranked_lists(&ranked_lists, self.config.rrf_k);
        fused.truncate(query.limit);

        if let Some(reason) = degraded_reason {
            for candidate in fused.iter_mut() {
                candidate.mark_degraded(reason.clone());
            }
        }

        Ok(fused)
    }

    /// Returns the list of query variants to search (always non-empty) and,
    /// on any expansion failure, `Some(reason)` to annotate every resulting
    /// candidate with.
    async fn expand_queries(&self, query: &Query) -> (Vec<String>, Option<String>) {
        let Some(llm) = &self.llm else {
            return (vec![query.text.clone()], None);
        };

        let messages = vec![
            Message::system(EXPANSION_SYSTEM_PROMPT),
            Message::user(build_expansion_prompt(&query.text, &self.config.strategies)),
        ];
        let llm_config = LlmConfig {
            json_mode: true,
            ..LlmConfig::default()
        };

        let generation = match llm.generate(&messages, &llm_config).await {
            Ok(g) => g,
            Err(_) => return (vec![query.text.clone()], Some(EXPANSION_FAILED_REASON.to_string())),
        };

        if let Some(limiter) = &self.limiter {
            let cost = generation.total_tokens() as f64 * self.config.cost_per_token;
            // Cost accounting is best-effort here: query expansion is not
            // itself gated by the limiter (only the llm reranker tier is).
            let _ = limiter.check_and_record(cost);
        }

        let parsed: Result<ExpansionResponse, _> = serde_json::from_str(generation.text.trim());
        let mut variants = match parsed {
            Ok(response) => response.queries,
            Err(_) => return (vec![query.text.clone()], Some(EXPANSION_FAILED_REASON.to_string())),
        };

        let original = query.text.trim();
        variants.retain(|v| !v.trim().is_empty() && v.trim() != original);
        variants.truncate(self.config.num_variations);

        if self.config.include_original {
            variants.insert(0, query.text.clone());
        }

        if variants.is_empty() {
            return (vec![query.text.clone()], Some(EXPANSION_FAILED_REASON.to_string()));
        }

        (variants, None)
    }
}

fn build_expansion_prompt(query: &str, strategies: &[String]) -> String {
    format!(
        "Original query: {query}\nGenerate alternative phrasings using these strategies: {}.",
        strategies.join(", ")
    )
}

/// RRF fusion across N independently-ranked result sets, using each list's
/// position (not its original score) as the per-channel rank — the same
/// formula as the hybrid retriever's channel fusion, applied here across
/// query variants instead of across vector-store channels.
fn fuse_ranked_lists(lists: &[RankedList], k: f32) -> RankedList {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut payloads: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut first_rank: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for list in lists {
        for (idx, candidate) in list.iter().enumerate() {
            let rank = idx + 1;
            *scores.entry(candidate.id.clone()).or_insert(0.0) += 1.0 / (k + rank as f32);
            payloads
                .entry(candidate.id.clone())
                .or_insert_with(|| candidate.payload.clone());
            first_rank.entry(candidate.id.clone()).or_insert(rank);
            if !order.iter().any(|id| id == &candidate.id) {
                order.push(candidate.id.clone());
            }
        }
    }

    order.sort_by(|a, b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| first_rank[a].cmp(&first_rank[b]))
            .then_with(|| a.cmp(b))
    });

    order
        .into_iter()
        .map(|id| {
            let score = scores[&id];
            let mut candidate = Candidate::new(id.clone(), score);
            candidate.rrf_score = Some(score);
            candidate.payload = payloads.remove(&id).unwrap_or_default();
            candidate
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memsearch_llm::{FinishReason, GenerationResult, LlmError};

    fn candidate(id: &str, payload_content: &str) -> Candidate {
        let mut c = Candidate::new(id, 1.0);
        c.payload.insert("content".to_string(), payload_content.to_string());
        c
    }

    #[test]
    fn fuse_single_list_preserves_relative_order() {
        let list = vec![candidate("a", "x"), candidate("b", "y"), candidate("c", "z")];
        let fused = fuse_ranked_lists(&[list], 60.0);
        let ids: Vec<&str> = fused.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn fuse_boosts_candidates_appearing_in_multiple_lists() {
        let list_a = vec![candidate("x", "1"), candidate("y", "2")];
        let list_b = vec![candidate("y", "2"), candidate("x", "1")];
        let fused = fuse_ranked_lists(&[list_a, list_b], 60.0);
        assert_eq!(fused[0].id, "x");
        assert!((fused[0].rrf_score.unwrap() - fused[1].rrf_score.unwrap()).abs() < 1e-9);
    }

    struct FailingBackend;

    #[async_trait]
    impl LlmBackend for FailingBackend {
        async fn generate(&self, _messages: &[Message], _config: &LlmConfig) -> Result<GenerationResult, LlmError> {
            Err(LlmError::Api("simulated outage".to_string()))
        }
    }

    struct JsonBackend(&'static str);

    #[async_trait]
    impl LlmBackend for JsonBackend {
        async fn generate(&self, _messages: &[Message], _config: &LlmConfig) -> Result<GenerationResult, LlmError> {
            Ok(GenerationResult {
                text: self.0.to_string(),
                prompt_tokens: 10,
                completion_tokens: 5,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn dummy_query() -> Query {
        Query::new("capital of france", 5, "acme")
    }

    fn inert_hybrid() -> Arc<HybridRetriever> {
        let store = Arc::new(
            crate::vector_store::VectorStore::new(memsearch_config::VectorStoreConfig::default())
                .expect("qdrant client construction does not require a live connection"),
        );
        Arc::new(HybridRetriever::new(
            store,
            Arc::new(crate::embeddings::EmbedderFactory::new(64, 16)),
            None,
            None,
            memsearch_config::HybridConfig::default(),
        ))
    }

    #[tokio::test]
    async fn expansion_failure_falls_back_to_original_only() {
        let retriever = MultiQueryRetriever::new(
            inert_hybrid(),
            Some(Arc::new(FailingBackend)),
            None,
            MultiQueryConfig::default(),
        );
        let (variants, reason) = retriever.expand_queries(&dummy_query()).await;
        assert_eq!(variants, vec!["capital of france".to_string()]);
        assert_eq!(reason.as_deref(), Some(EXPANSION_FAILED_REASON));
    }

    #[tokio::test]
    async fn well_formed_expansion_parses_and_filters_original() {
        let backend = JsonBackend(r#"{"queries": ["capital of france", "paris capital", ""]}"#);
        let retriever = MultiQueryRetriever::new(
            inert_hybrid(),
            Some(Arc::new(backend)),
            None,
            MultiQueryConfig::default(),
        );
        let (variants, reason) = retriever.expand_queries(&dummy_query()).await;
        assert!(reason.is_none());
        assert!(variants.contains(&"paris capital".to_string()));
        assert!(variants.contains(&"capital of france".to_string()));
        assert_eq!(variants.len(), 2);
    }

    #[tokio::test]
    async fn malformed_json_degrades_to_original_only() {
        let backend = JsonBackend("not json at all");
        let retriever = MultiQueryRetriever::new(
            inert_hybrid(),
            Some(Arc::new(backend)),
            None,
            MultiQueryConfig::default(),
        );
        let (variants, reason) = retriever.expand_queries(&dummy_query()).await;
        assert_eq!(variants, vec!["capital of france".to_string()]);
        assert_eq!(reason.as_deref(), Some(EXPANSION_FAILED_REASON));
    }

    #[test]
    fn prompt_mentions_strategies() {
        let prompt = build_expansion_prompt("hello", &["paraphrase".to_string(), "keyword".to_string()]);
        assert!(prompt.contains("paraphrase"));
        assert!(prompt.contains("keyword"));
        assert!(prompt.contains("hello"));
    }
}
