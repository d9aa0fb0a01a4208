//! Single-query dense/sparse/hybrid retrieval with optional reranking
//! (component G). Every other retriever (multi-query, session-aware) wraps
//! this one rather than talking to the vector store directly.

use std::collections::HashMap;
use std::sync::Arc;

use memsearch_config::HybridConfig;
use memsearch_core::{filter, Candidate, Error, Query, RankedList, RerankerTier, Strategy};

use crate::embeddings::{EmbedderFactory, EmbedderKind};
use crate::reranker::STOPWORDS;
use crate::router::RerankerRouter;
use crate::sparse_search::SharedSparseIndex;
use crate::vector_store::{StoreHit, VectorStore};

pub struct HybridRetriever {
    store: Arc<VectorStore>,
    embedder_factory: Arc<EmbedderFactory>,
    sparse_index: Option<SharedSparseIndex>,
    router: Option<Arc<RerankerRouter>>,
    config: HybridConfig,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<VectorStore>,
        embedder_factory: Arc<EmbedderFactory>,
        sparse_index: Option<SharedSparseIndex>,
        router: Option<Arc<RerankerRouter>>,
        config: HybridConfig,
    ) -> Self {
        Self {
            store,
            embedder_factory,
            sparse_index,
            router,
            config,
        }
    }

    pub async fn search(&self, query: &Query) -> Result<RankedList, Error> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let store_filter = filter::build(&query.filters)?;
        let strategy = self.resolve_strategy(query);
        let prefetch_depth = self.prefetch_depth(query);

        let mut candidates = self
            .retrieve_candidates(query, strategy, prefetch_depth, &store_filter)
            .await?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        if query.rerank {
            self.apply_rerank(query, &mut candidates).await;
        }

        candidates.sort_by(|a, b| {
            b.final_score()
                .partial_cmp(&a.final_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(query.limit);
        Ok(candidates)
    }

    fn resolve_strategy(&self, query: &Query) -> Strategy {
        if query.strategy != Strategy::Auto {
            return query.strategy;
        }
        classify_strategy(&query.text, self.config.stopword_density_threshold)
    }

    fn prefetch_depth(&self, query: &Query) -> usize {
        if let Some(depth) = query.rerank_depth {
            return depth.max(query.limit);
        }
        let multiplier = if query.rerank {
            self.config.prefetch_multiplier_with_rerank
        } else {
            self.config.prefetch_multiplier_no_rerank
        };
        (query.limit * multiplier).max(self.config.prefetch_depth_floor)
    }

    async fn retrieve_candidates(
        &self,
        query: &Query,
        strategy: Strategy,
        depth: usize,
        store_filter: &memsearch_core::StoreFilter,
    ) -> Result<Vec<Candidate>, Error> {
        match strategy {
            Strategy::Dense => {
                let hits = self.dense_search(query, depth, store_filter).await?;
                Ok(single_channel_candidates(hits))
            }
            Strategy::Auto => unreachable!("resolve_strategy never returns Auto"),
            Strategy::Sparse => {
                let hits = self.sparse_search(query, depth).await?;
                Ok(single_channel_candidates(sparse_hits_to_store_hits(hits)))
            }
            Strategy::Hybrid => {
                let (dense_result, sparse_result) =
                    tokio::join!(self.dense_search(query, depth, store_filter), self.sparse_search(query, depth));
                let dense_hits = dense_result?;
                let sparse_hits = sparse_hits_to_store_hits(sparse_result?);
                Ok(fuse_channels(
                    &[("dense", dense_hits), ("sparse", sparse_hits)],
                    self.config.rrf_k,
                ))
            }
        }
    }

    async fn dense_search(
        &self,
        query: &Query,
        depth: usize,
        store_filter: &memsearch_core::StoreFilter,
    ) -> Result<Vec<StoreHit>, Error> {
        let embedder = self.embedder_factory.get(EmbedderKind::DenseText);
        let vector = embedder.embed_query(&query.text).await?;
        self.store
            .search_dense(self.store.turns_collection(), &vector, depth, Some(store_filter))
            .await
            .map_err(Error::from)
    }

    async fn sparse_search(
        &self,
        query: &Query,
        depth: usize,
    ) -> Result<Vec<crate::sparse_search::SparseHit>, Error> {
        let index = self
            .sparse_index
            .as_ref()
            .ok_or_else(|| Error::Unavailable("sparse index not configured".to_string()))?;
        let tenant_id = query
            .filters
            .tenant_id
            .clone()
            .ok_or_else(|| Error::Invariant("tenant_missing".to_string()))?;
        let guard = index.read().await;
        guard.search(&query.text, &tenant_id, depth)
    }

    async fn apply_rerank(&self, query: &Query, candidates: &mut [Candidate]) {
        let Some(router) = &self.router else {
            for c in candidates.iter_mut() {
                c.mark_degraded("rerank_requested_but_no_router_configured");
            }
            return;
        };

        let tier = query.rerank_tier.unwrap_or(RerankerTier::Fast);
        let field = &self.config.content_payload_field;
        let documents: Vec<(String, String)> = candidates
            .iter()
            .map(|c| (c.id.clone(), c.payload.get(field).cloned().unwrap_or_default()))
            .collect();

        let result = router.rerank(tier, &query.text, &documents).await;

        for (candidate, score) in candidates.iter_mut().zip(result.scores.iter()) {
            candidate.reranker_score = Some(*score);
            candidate.rerank_tier = Some(result.tier_used);
        }

        if result.degraded {
            let reason = result.degraded_reason.unwrap_or_default();
            for candidate in candidates.iter_mut() {
                candidate.mark_degraded(reason.clone());
            }
        }
    }
}

fn single_channel_candidates(hits: Vec<StoreHit>) -> Vec<Candidate> {
    hits.into_iter()
        .map(|hit| {
            let mut candidate = Candidate::new(hit.id, hit.score);
            candidate.payload = hit.payload;
            candidate
        })
        .collect()
}

fn sparse_hits_to_store_hits(hits: Vec<crate::sparse_search::SparseHit>) -> Vec<StoreHit> {
    hits.into_iter()
        .map(|h| StoreHit {
            id: h.id,
            score: h.score,
            payload: HashMap::new(),
        })
        .collect()
}

/// Client-side Reciprocal Rank Fusion across named channels. Ranks are
/// 1-based within each channel; missing-from-channel contributions are
/// zero. Ties broken by the rank at which a candidate first appeared across
/// channels (in the order channels were passed in), then by id.
fn fuse_channels(named_channels: &[(&str, Vec<StoreHit>)], k: f32) -> Vec<Candidate> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut ranks: HashMap<String, HashMap<String, usize>> = HashMap::new();
    let mut payloads: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut first_rank: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for (channel_name, hits) in named_channels {
        for (idx, hit) in hits.iter().enumerate() {
            let rank = idx + 1;
            *scores.entry(hit.id.clone()).or_insert(0.0) += 1.0 / (k + rank as f32);
            ranks
                .entry(hit.id.clone())
                .or_default()
                .insert((*channel_name).to_string(), rank);
            payloads
                .entry(hit.id.clone())
                .or_insert_with(|| hit.payload.clone());
            first_rank.entry(hit.id.clone()).or_insert(rank);
            if !order.iter().any(|id| id == &hit.id) {
                order.push(hit.id.clone());
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
            candidate.channel_ranks = ranks.remove(&id).unwrap_or_default();
            candidate.payload = payloads.remove(&id).unwrap_or_default();
            candidate
        })
        .collect()
}

const INTERROGATIVES: &[&str] = &["who", "what", "when", "where", "why", "how", "which", "whose"];

/// Heuristic strategy classifier used only when the caller leaves
/// `Query.strategy` at `Auto`. Natural-language markers and high stopword
/// density route to `hybrid`; a short, token-sparse query routes to
/// `sparse`; the default is `hybrid`.
fn classify_strategy(text: &str, stopword_density_threshold: f32) -> Strategy {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    if words.is_empty() {
        return Strategy::Hybrid;
    }

    let has_interrogative =
        words.iter().any(|w| INTERROGATIVES.contains(w)) || text.trim_end().ends_with('?');
    let stopword_count = words.iter().filter(|w| STOPWORDS.contains(w)).count();
    let density = stopword_count as f32 / words.len() as f32;

    if has_interrogative || density >= stopword_density_threshold {
        Strategy::Hybrid
    } else if words.len() <= 3 {
        Strategy::Sparse
    } else {
        Strategy::Hybrid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_fusion_matches_scenario_two() {
        let dense = vec![
            StoreHit { id: "d1".to_string(), score: 0.9, payload: HashMap::new() },
            StoreHit { id: "d2".to_string(), score: 0.8, payload: HashMap::new() },
            StoreHit { id: "d3".to_string(), score: 0.7, payload: HashMap::new() },
        ];
        let sparse = vec![
            StoreHit { id: "d3".to_string(), score: 5.0, payload: HashMap::new() },
            StoreHit { id: "d2".to_string(), score: 4.0, payload: HashMap::new() },
            StoreHit { id: "d4".to_string(), score: 3.0, payload: HashMap::new() },
        ];

        let fused = fuse_channels(&[("dense", dense), ("sparse", sparse)], 60.0);
        let ids: Vec<&str> = fused.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["d3", "d2", "d1", "d4"]);

        let d3 = fused.iter().find(|c| c.id == "d3").unwrap();
        let expected_d3 = 1.0 / 63.0 + 1.0 / 61.0;
        assert!((d3.rrf_score.unwrap() - expected_d3).abs() < 1e-6);

        let d2 = fused.iter().find(|c| c.id == "d2").unwrap();
        let expected_d2 = 1.0 / 62.0 + 1.0 / 62.0;
        assert!((d2.rrf_score.unwrap() - expected_d2).abs() < 1e-6);
    }

    #[test]
    fn fusion_zeroes_missing_channel_contributions() {
        let dense = vec![StoreHit { id: "only-dense".to_string(), score: 0.5, payload: HashMap::new() }];
        let sparse = vec![];
        let fused = fuse_channels(&[("dense", dense), ("sparse", sparse)], 60.0);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].channel_ranks.len(), 1);
    }

    #[test]
    fn classify_routes_question_to_hybrid() {
        assert_eq!(classify_strategy("what is the capital of france?", 0.4), Strategy::Hybrid);
    }

    #[test]
    fn classify_routes_short_keyword_query_to_sparse() {
        assert_eq!(classify_strategy("gold loan", 0.4), Strategy::Sparse);
    }

    #[test]
    fn classify_defaults_to_hybrid_for_long_keyword_dense_query() {
        assert_eq!(
            classify_strategy("quarterly gold loan interest rate trend analysis report", 0.4),
            Strategy::Hybrid
        );
    }
}
