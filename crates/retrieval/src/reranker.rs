//! Reranker tier implementations (component C).
//!
//! Five tiers, ordered roughly by cost and quality: fast, accurate, code,
//! colbert, llm. Each implements the same [`RerankerBackend`] contract so
//! the router (component E) can swap them without knowing which tier it
//! holds. fast/accurate/code are heuristic scorers in the style of the
//! teacher's `SimpleScorer` — no model dependency, deterministic, cheap.
//! colbert does late-interaction MaxSim over the multi-vector embedder.
//! llm delegates to a chat-completion backend with a JSON-scoring prompt.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use memsearch_core::Error;
use memsearch_llm::{LlmBackend, LlmConfig, Message};

use crate::embeddings::{Embedder, EmbedderKind, EmbedderFactory};

#[async_trait]
pub trait RerankerBackend: Send + Sync {
    /// Score `query` against each `(id, content)` pair, returning one score
    /// per input document in the same order. Scores need not be calibrated
    /// across tiers — only the router compares like with like.
    async fn score(&self, query: &str, documents: &[(String, String)]) -> Result<Vec<f32>, Error>;
}

pub(crate) const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "to", "of", "in", "for",
    "on", "with", "at", "by", "from", "as", "and", "but", "if", "or", "because", "this", "that",
    "it", "its", "i", "you", "we", "they", "what", "which", "who",
];

/// TF-IDF-like keyword overlap score shared by the fast/accurate tiers, in
/// the style of the teacher's `SimpleScorer`.
fn keyword_overlap_score(query: &str, document: &str) -> f32 {
    let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();
    let query_lower = query.to_lowercase();
    let doc_lower = document.to_lowercase();

    let query_terms: Vec<&str> = query_lower
        .split_whitespace()
        .filter(|w| w.len() > 1 && !stopwords.contains(w))
        .collect();
    if query_terms.is_empty() {
        return 0.0;
    }

    let doc_words: Vec<&str> = doc_lower.split_whitespace().collect();
    let doc_len = doc_words.len().max(1) as f32;

    let mut total = 0.0f32;
    let mut matched = 0usize;
    for (pos, term) in query_terms.iter().enumerate() {
        let tf = doc_words.iter().filter(|w| **w == *term).count() as f32;
        if tf > 0.0 {
            matched += 1;
            let tf_score = tf.sqrt();
            let idf_approx = (1.0 + term.len() as f32).ln();
            let position_weight = 1.0 / (1.0 + pos as f32 * 0.1);
            let length_norm = 1.0 / (1.0 + (doc_len / 50.0).sqrt());
            total += tf_score * idf_approx * position_weight * length_norm;
        }
    }

    let coverage = matched as f32 / query_terms.len() as f32;
    let raw = total + coverage * 0.3;
    (raw / (raw + 1.0)).min(1.0)
}

/// Fast tier: plain keyword overlap, no normalization beyond the baseline.
pub struct FastReranker;

#[async_trait]
impl RerankerBackend for FastReranker {
    async fn score(&self, query: &str, documents: &[(String, String)]) -> Result<Vec<f32>, Error> {
        Ok(documents
            .iter()
            .map(|(_, text)| keyword_overlap_score(query, text))
            .collect())
    }
}

/// Accurate tier: keyword overlap plus a phrase-adjacency bonus for terms
/// that appear next to each other in the same order as the query.
pub struct AccurateReranker;

#[async_trait]
impl RerankerBackend for AccurateReranker {
    async fn score(&self, query: &str, documents: &[(String, String)]) -> Result<Vec<f32>, Error> {
        let query_lower = query.to_lowercase();
        Ok(documents
            .iter()
            .map(|(_, text)| {
                let base = keyword_overlap_score(query, text);
                let doc_lower = text.to_lowercase();
                let phrase_bonus = if query_lower.split_whitespace().count() > 1
                    && doc_lower.contains(query_lower.trim())
                {
                    0.15
                } else {
                    0.0
                };
                (base + phrase_bonus).min(1.0)
            })
            .collect())
    }
}

/// Code tier: case-sensitive identifier overlap, since camelCase/snake_case
/// tokens carry meaning that lowercasing destroys.
pub struct CodeReranker;

#[async_trait]
impl RerankerBackend for CodeReranker {
    async fn score(&self, query: &str, documents: &[(String, String)]) -> Result<Vec<f32>, Error> {
        let query_tokens: Vec<&str> = query
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|s| !s.is_empty())
            .collect();
        if query_tokens.is_empty() {
            return Ok(vec![0.0; documents.len()]);
        }

        Ok(documents
            .iter()
            .map(|(_, text)| {
                let doc_tokens: HashSet<&str> = text
                    .split(|c: char| !c.is_alphanumeric() && c != '_')
                    .filter(|s| !s.is_empty())
                    .collect();
                let matched = query_tokens
                    .iter()
                    .filter(|t| doc_tokens.contains(*t))
                    .count();
                matched as f32 / query_tokens.len() as f32
            })
            .collect())
    }
}

/// ColBERT-style late interaction: MaxSim of per-token multi-vector
/// embeddings. Since the multi-vector embedder here stands in for a real
/// ColBERT model, each "token" vector is approximated by embedding each
/// whitespace-split chunk of the text independently.
pub struct ColbertReranker {
    embedder: Arc<dyn Embedder>,
}

impl ColbertReranker {
    pub fn new(factory: &EmbedderFactory) -> Self {
        Self {
            embedder: factory.get(EmbedderKind::MultiVector),
        }
    }

    async fn token_vectors(&self, text: &str) -> Result<Vec<Vec<f32>>, Error> {
        let mut vectors = Vec::new();
        for token in text.split_whitespace().take(64) {
            vectors.push(self.embedder.embed_document(token).await?);
        }
        if vectors.is_empty() {
            vectors.push(self.embedder.embed_document(text).await?);
        }
        Ok(vectors)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

fn maxsim(query_vecs: &[Vec<f32>], doc_vecs: &[Vec<f32>]) -> f32 {
    if query_vecs.is_empty() || doc_vecs.is_empty() {
        return 0.0;
    }
    let sum: f32 = query_vecs
        .iter()
        .map(|q| {
            doc_vecs
                .iter()
                .map(|d| cosine(q, d))
                .fold(f32::MIN, f32::max)
        })
        .sum();
    sum / query_vecs.len() as f32
}

#[async_trait]
impl RerankerBackend for ColbertReranker {
    async fn score(&self, query: &str, documents: &[(String, String)]) -> Result<Vec<f32>, Error> {
        let query_vecs = self.token_vectors(query).await?;
        let mut scores = Vec::with_capacity(documents.len());
        for (_, text) in documents {
            let doc_vecs = self.token_vectors(text).await?;
            scores.push(maxsim(&query_vecs, &doc_vecs));
        }
        Ok(scores)
    }
}

/// LLM tier: asks a chat model to return a JSON array of integer scores in
/// `[0, 100]`, one per document, in input order. Documents are truncated to
/// a fixed character budget before being sent — see SPEC_FULL.md §9 for why
/// that budget is a flat count rather than a token estimate.
pub struct LlmReranker {
    backend: Arc<dyn LlmBackend>,
    doc_char_budget: usize,
}

impl LlmReranker {
    pub fn new(backend: Arc<dyn LlmBackend>, doc_char_budget: usize) -> Self {
        Self {
            backend,
            doc_char_budget,
        }
    }

    fn truncate(&self, text: &str) -> String {
        if text.len() <= self.doc_char_budget {
            text.to_string()
        } else {
            text.chars().take(self.doc_char_budget).collect()
        }
    }

    fn build_prompt(&self, query: &str, documents: &[(String, String)]) -> String {
        let mut listing = String::new();
        for (i, (_, text)) in documents.iter().enumerate() {
            listing.push_str(&format!("[{}] {}\n", i, self.truncate(text)));
        }
        format!(
            "Score how relevant each document is to the query on a 0-100 integer scale.\n\
             Query: {query}\n\nDocuments:\n{listing}\n\
             Respond with JSON only: {{\"scores\": [<int>, ...]}} in the same order as the documents."
        )
    }
}

#[derive(serde::Deserialize)]
struct LlmScores {
    scores: Vec<i64>,
}

#[async_trait]
impl RerankerBackend for LlmReranker {
    async fn score(&self, query: &str, documents: &[(String, String)]) -> Result<Vec<f32>, Error> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = self.build_prompt(query, documents);
        let messages = vec![Message::user(prompt)];
        let config = LlmConfig {
            json_mode: true,
            ..LlmConfig::default()
        };

        let generation = self
            .backend
            .generate(&messages, &config)
            .await
            .map_err(memsearch_core::Error::from)?;

        let parsed: LlmScores = match serde_json::from_str(generation.text.trim()) {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!("llm reranker returned unparsable json, degrading to uniform scores");
                return Ok(vec![0.5; documents.len()]);
            }
        };

        if parsed.scores.len() != documents.len() {
            tracing::warn!(
                expected = documents.len(),
                got = parsed.scores.len(),
                "llm reranker returned wrong number of scores, degrading to uniform scores"
            );
            return Ok(vec![0.5; documents.len()]);
        }

        Ok(parsed
            .scores
            .into_iter()
            .map(|s| (s.clamp(0, 100) as f32) / 100.0)
            .collect())
    }
}
