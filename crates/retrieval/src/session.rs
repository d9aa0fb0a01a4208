//! Two-stage hierarchical retrieval with parallel per-session fan-out
//! (component I): find the most relevant sessions, then the most relevant
//! turns within each, without letting one session's failure take down the
//! rest.

use std::sync::Arc;

use memsearch_config::SessionRetrieverConfig;
use memsearch_core::{filter, Candidate, Error, RankedList, RawFilters, RerankerTier, SessionHit};

use crate::embeddings::{EmbedderFactory, EmbedderKind};
use crate::router::RerankerRouter;
use crate::vector_store::VectorStore;

pub struct SessionAwareRetriever {
    store: Arc<VectorStore>,
    embedder_factory: Arc<EmbedderFactory>,
    router: Option<Arc<RerankerRouter>>,
    config: SessionRetrieverConfig,
}

impl SessionAwareRetriever {
    pub fn new(
        store: Arc<VectorStore>,
        embedder_factory: Arc<EmbedderFactory>,
        router: Option<Arc<RerankerRouter>>,
        config: SessionRetrieverConfig,
    ) -> Self {
        Self {
            store,
            embedder_factory,
            router,
            config,
        }
    }

    /// `query_text` and `tenant_id` stand in for the subset of `Query`
    /// fields this entry point actually uses — strategy/rerank-tier
    /// selection is fixed by the algorithm (§4.I), not caller-configurable.
    pub async fn retrieve(&self, query_text: &str, tenant_id: &str) -> Result<RankedList, Error> {
        if self.config.top_sessions == 0 {
            return Ok(Vec::new());
        }

        let raw_filters = RawFilters::tenant(tenant_id);
        let tenant_filter = filter::build(&raw_filters)?;

        let embedder = self.embedder_factory.get(EmbedderKind::DenseText);
        let query_vector = match embedder.embed_query(query_text).await {
            Ok(v) => v,
            Err(_) => return Ok(Vec::new()),
        };

        let session_hits = match self
            .store
            .search_dense(
                self.store.sessions_collection(),
                &query_vector,
                self.config.top_sessions,
                Some(&tenant_filter),
            )
            .await
        {
            Ok(hits) => hits,
            Err(_) => return Ok(Vec::new()),
        };

        let sessions: Vec<SessionHit> = session_hits
            .into_iter()
            .filter(|hit| hit.score >= self.config.session_score_threshold)
            .map(|hit| SessionHit {
                session_id: hit.id,
                summary: hit.payload.get("summary").cloned().unwrap_or_default(),
                score: hit.score,
                topics: Vec::new(),
                entities: Vec::new(),
            })
            .collect();

        if sessions.is_empty() {
            return Ok(Vec::new());
        }

        let stage_two_results = if self.config.parallel_turn_retrieval {
            let futures = sessions
                .iter()
                .map(|session| self.fetch_turns_for_session(session, tenant_id, &query_vector));
            futures::future::join_all(futures).await
        } else {
            let mut results = Vec::with_capacity(sessions.len());
            for session in &sessions {
                results.push(self.fetch_turns_for_session(session, tenant_id, &query_vector).await);
            }
            results
        };

        let mut candidates: Vec<Candidate> = stage_two_results.into_iter().flatten().collect();

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        if candidates.len() > self.config.final_top_k {
            if let Some(router) = &self.router {
                let documents: Vec<(String, String)> = candidates
                    .iter()
                    .map(|c| (c.id.clone(), c.payload.get("content").cloned().unwrap_or_default()))
                    .collect();
                let result = router.rerank(RerankerTier::Fast, query_text, &documents).await;
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

        candidates.sort_by(|a, b| {
            b.final_score()
                .partial_cmp(&a.final_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(self.config.final_top_k);
        Ok(candidates)
    }

    /// One stage-2 query, isolated from its siblings: a failure here
    /// contributes zero turns for this session rather than aborting the
    /// overall call.
    async fn fetch_turns_for_session(
        &self,
        session: &SessionHit,
        tenant_id: &str,
        query_vector: &[f32],
    ) -> Vec<Candidate> {
        let raw_filters = RawFilters::tenant(tenant_id).with_session_id(session.session_id.clone());
        let filter = match filter::build(&raw_filters) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        let hits = match self
            .store
            .search_dense(
                self.store.turns_collection(),
                query_vector,
                self.config.turns_per_session,
                Some(&filter),
            )
            .await
        {
            Ok(hits) => hits,
            Err(_) => return Vec::new(),
        };

        hits.into_iter()
            .map(|hit| {
                let mut candidate = Candidate::new(hit.id, hit.score);
                candidate.payload = hit.payload;
                candidate
                    .payload
                    .insert("session_id".to_string(), session.session_id.clone());
                candidate
                    .payload
                    .insert("session_summary".to_string(), session.summary.clone());
                candidate
                    .payload
                    .insert("session_score".to_string(), session.score.to_string());
                candidate
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inert_store() -> Arc<VectorStore> {
        Arc::new(
            VectorStore::new(memsearch_config::VectorStoreConfig::default())
                .expect("qdrant client construction does not require a live connection"),
        )
    }

    #[tokio::test]
    async fn zero_top_sessions_skips_stage_one() {
        let retriever = SessionAwareRetriever::new(
            inert_store(),
            Arc::new(EmbedderFactory::new(64, 16)),
            None,
            SessionRetrieverConfig {
                top_sessions: 0,
                ..SessionRetrieverConfig::default()
            },
        );
        let result = retriever.retrieve("query", "acme").await.unwrap();
        assert!(result.is_empty());
    }
}
