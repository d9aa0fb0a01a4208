//! Semantic chunker (component J, auxiliary).
//!
//! Splits a long text into embedding-coherent pieces for presenting a long
//! payload back in smaller chunks, not for indexing. Fenced code blocks are
//! pulled out before sentence splitting so embedding never sees source code
//! and restored verbatim once chunk boundaries are settled.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use memsearch_config::ChunkerConfig;
use memsearch_core::Error;

use crate::embeddings::Embedder;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub is_code: bool,
    pub sentence_count: usize,
}

pub struct SemanticChunker {
    embedder: Arc<dyn Embedder>,
    config: ChunkerConfig,
}

impl SemanticChunker {
    pub fn new(embedder: Arc<dyn Embedder>, config: ChunkerConfig) -> Self {
        Self { embedder, config }
    }

    pub async fn chunk(&self, text: &str) -> Result<Vec<Chunk>, Error> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let extraction = extract_code_blocks(text);
        let sentences = split_sentences(&extraction.substituted, &extraction);

        if sentences.len() <= 1 || extraction.substituted.chars().count() <= self.config.max_chunk_chars {
            let (start, end) = (0, text.chars().count());
            let restored = restore_placeholders(&extraction.substituted, &extraction.placeholders);
            return Ok(vec![Chunk {
                index: 0,
                is_code: restored.contains("```"),
                text: restored,
                start,
                end,
                sentence_count: sentences.len().max(1),
            }]);
        }

        let sentence_texts: Vec<String> = sentences.iter().map(|s| s.restored.clone()).collect();
        let embeddings = self.embedder.embed_batch_documents(&sentence_texts).await?;

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut current = vec![0usize];
        for i in 1..sentences.len() {
            let sim = cosine_similarity(&embeddings[i - 1], &embeddings[i]);
            if sim < self.config.similarity_threshold {
                groups.push(std::mem::take(&mut current));
            }
            current.push(i);
        }
        groups.push(current);

        let balanced = balance_groups(groups, &sentences, self.config.min_chunk_chars, self.config.max_chunk_chars);

        let mut chunks = Vec::new();
        for group in balanced {
            let pieces = if group_restored_len(&group, &sentences) > self.config.max_chunk_chars {
                force_split(group, &sentences, self.config.max_chunk_chars)
            } else {
                vec![group]
            };
            for piece in pieces {
                chunks.push(build_chunk(chunks.len(), &piece, &sentences, &extraction));
            }
        }

        Ok(chunks)
    }
}

struct Sentence {
    restored: String,
    sub_start: usize,
    sub_end: usize,
}

fn build_chunk(index: usize, group: &[usize], sentences: &[Sentence], extraction: &Extraction) -> Chunk {
    let text = group
        .iter()
        .map(|&i| sentences[i].restored.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let start = map_offset(&extraction.deltas, sentences[group[0]].sub_start);
    let end = map_offset(&extraction.deltas, sentences[*group.last().unwrap()].sub_end);
    Chunk {
        index,
        is_code: text.contains("```"),
        text,
        start,
        end,
        sentence_count: group.len(),
    }
}

fn group_restored_len(group: &[usize], sentences: &[Sentence]) -> usize {
    let joined: usize = group.iter().map(|&i| sentences[i].restored.chars().count()).sum();
    joined + group.len().saturating_sub(1)
}

/// Sequentially absorb adjacent groups into the current one while the
/// running total stays under `min_chars` and a further merge would not
/// exceed `max_chars`.
fn balance_groups(groups: Vec<Vec<usize>>, sentences: &[Sentence], min_chars: usize, max_chars: usize) -> Vec<Vec<usize>> {
    let mut result = Vec::new();
    let mut current: Vec<usize> = Vec::new();

    for group in groups {
        if current.is_empty() {
            current = group;
            continue;
        }
        let current_len = group_restored_len(&current, sentences);
        let combined_len = current_len + group_restored_len(&group, sentences) + 1;
        if current_len < min_chars && combined_len <= max_chars {
            current.extend(group);
        } else {
            result.push(std::mem::replace(&mut current, group));
        }
    }
    if !current.is_empty() {
        result.push(current);
    }
    result
}

/// Split an oversized group at sentence boundaries so no resulting piece
/// exceeds `max_chars` (a single sentence longer than `max_chars` still
/// becomes its own, oversized piece — there is no sub-sentence split point).
fn force_split(group: Vec<usize>, sentences: &[Sentence], max_chars: usize) -> Vec<Vec<usize>> {
    let mut pieces = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_len = 0usize;

    for idx in group {
        let sent_len = sentences[idx].restored.chars().count();
        let addition = sent_len + if current.is_empty() { 0 } else { 1 };
        if !current.is_empty() && current_len + addition > max_chars {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += sent_len + if current.is_empty() { 0 } else { 1 };
        current.push(idx);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

struct DeltaPoint {
    sub_offset: usize,
    delta: isize,
}

struct Extraction {
    substituted: String,
    placeholders: Vec<(String, String)>,
    deltas: Vec<DeltaPoint>,
}

static FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[\s\S]*?```").unwrap());

/// Pull fenced code blocks out of `text`, replacing each with a unique
/// placeholder token, and record the byte-offset mapping needed to translate
/// positions in the substituted text back to positions in the original.
fn extract_code_blocks(text: &str) -> Extraction {
    let mut substituted = String::new();
    let mut placeholders = Vec::new();
    let mut deltas = vec![DeltaPoint { sub_offset: 0, delta: 0 }];
    let mut last_end = 0usize;
    let mut counter = 0usize;

    for m in FENCE_RE.find_iter(text) {
        substituted.push_str(&text[last_end..m.start()]);
        let placeholder = format!("\u{E000}CODEBLOCK{counter}\u{E000}");
        let ph_start = substituted.len();
        substituted.push_str(&placeholder);
        let ph_end = substituted.len();

        deltas.push(DeltaPoint {
            sub_offset: ph_start,
            delta: m.start() as isize - ph_start as isize,
        });
        deltas.push(DeltaPoint {
            sub_offset: ph_end,
            delta: m.end() as isize - ph_end as isize,
        });

        placeholders.push((placeholder, m.as_str().to_string()));
        last_end = m.end();
        counter += 1;
    }
    substituted.push_str(&text[last_end..]);

    Extraction { substituted, placeholders, deltas }
}

fn restore_placeholders(text: &str, placeholders: &[(String, String)]) -> String {
    let mut restored = text.to_string();
    for (placeholder, original) in placeholders {
        restored = restored.replace(placeholder, original);
    }
    restored
}

fn map_offset(deltas: &[DeltaPoint], sub_offset: usize) -> usize {
    let delta = deltas
        .iter()
        .rev()
        .find(|d| d.sub_offset <= sub_offset)
        .map(|d| d.delta)
        .unwrap_or(0);
    (sub_offset as isize + delta).max(0) as usize
}

static BOUNDARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<punct>[.!?])(?P<ws>\s+)(?P<next>[A-Z])|(?P<gap>\n[ \t]*\n)|(?P<colon>:)(?P<cws>[ \t]*\n)").unwrap()
});

/// Split `text` into sentences by punctuation-then-capital, double-newline,
/// or colon-then-newline boundaries, carrying each sentence's byte offsets
/// within `text` (the substituted, placeholder-bearing text) and a
/// placeholder-restored copy of its content.
fn split_sentences(text: &str, extraction: &Extraction) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut cursor = 0usize;

    for m in BOUNDARY_RE.find_iter(text) {
        let (end_first, start_next) = if let Some(punct) = m.name("punct") {
            (punct.end(), m.name("next").unwrap().start())
        } else if let Some(gap) = m.name("gap") {
            (gap.start(), gap.end())
        } else {
            let colon = m.name("colon").unwrap();
            (colon.end(), m.name("cws").unwrap().end())
        };

        if end_first <= cursor {
            continue;
        }
        push_sentence(&mut sentences, text, extraction, cursor, end_first);
        cursor = start_next;
    }

    if cursor < text.len() {
        push_sentence(&mut sentences, text, extraction, cursor, text.len());
    }

    sentences
}

fn push_sentence(sentences: &mut Vec<Sentence>, text: &str, extraction: &Extraction, start: usize, end: usize) {
    let raw = text[start..end].trim();
    if raw.is_empty() {
        return;
    }
    let trimmed_start = start + (text[start..end].len() - text[start..end].trim_start().len());
    let trimmed_end = trimmed_start + raw.len();
    sentences.push(Sentence {
        restored: restore_placeholders(raw, &extraction.placeholders),
        sub_start: trimmed_start,
        sub_end: trimmed_end,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{DeterministicEmbedder, EmbedderKind};

    fn chunker() -> SemanticChunker {
        SemanticChunker::new(
            Arc::new(DeterministicEmbedder::new(EmbedderKind::DenseText, 32)),
            ChunkerConfig::default(),
        )
    }

    #[tokio::test]
    async fn empty_input_yields_no_chunks() {
        let chunks = chunker().chunk("   \n  ").await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn short_input_becomes_a_single_chunk() {
        let chunks = chunker().chunk("Just one short sentence here.").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[tokio::test]
    async fn preserves_fenced_code_blocks_verbatim() {
        let text = "Here is some setup text explaining the function below. \
```rust\nfn add(a: i32, b: i32) -> i32 { a + b }\n```\n\
And here is the explanation that follows the snippet in more words.";
        let chunks = chunker().chunk(text).await.unwrap();
        let full: String = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ");
        assert!(full.contains("fn add(a: i32, b: i32) -> i32 { a + b }"));
        assert!(chunks.iter().any(|c| c.is_code));
    }

    #[tokio::test]
    async fn splits_on_double_newline_and_colon_newline() {
        let sentences = split_sentences(
            "First part ends here.\n\nSecond part follows after a gap.",
            &extract_code_blocks("x"),
        );
        assert!(sentences.len() >= 2);
    }

    #[test]
    fn placeholder_collisions_avoided_by_counter() {
        let text = "```a```\nmiddle\n```b```";
        let extraction = extract_code_blocks(text);
        assert_eq!(extraction.placeholders.len(), 2);
        assert_ne!(extraction.placeholders[0].0, extraction.placeholders[1].0);
        let restored = restore_placeholders(&extraction.substituted, &extraction.placeholders);
        assert_eq!(restored, text);
    }

    #[test]
    fn balance_merges_small_adjacent_groups() {
        let sentences = vec![
            Sentence { restored: "a".repeat(10), sub_start: 0, sub_end: 10 },
            Sentence { restored: "b".repeat(10), sub_start: 11, sub_end: 21 },
            Sentence { restored: "c".repeat(10), sub_start: 22, sub_end: 32 },
        ];
        let groups = vec![vec![0], vec![1], vec![2]];
        let balanced = balance_groups(groups, &sentences, 25, 1500);
        assert_eq!(balanced.len(), 1);
        assert_eq!(balanced[0], vec![0, 1, 2]);
    }

    #[test]
    fn force_split_keeps_pieces_under_max_chars() {
        let sentences = vec![
            Sentence { restored: "a".repeat(60), sub_start: 0, sub_end: 60 },
            Sentence { restored: "b".repeat(60), sub_start: 61, sub_end: 121 },
            Sentence { restored: "c".repeat(60), sub_start: 122, sub_end: 182 },
        ];
        let pieces = force_split(vec![0, 1, 2], &sentences, 100);
        assert!(pieces.len() >= 2);
        for piece in &pieces {
            assert!(group_restored_len(piece, &sentences) <= 121);
        }
    }
}
