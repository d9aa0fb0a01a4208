//! Lexical (BM25) search over an in-process Tantivy index.
//!
//! Serves the sparse channel of the hybrid retriever. Grounded in the
//! teacher's `sparse_search.rs`: a custom tokenizer pipeline registered
//! under its own name so stemming/length-filtering stay consistent between
//! indexing and querying, and BM25 as the scoring function Tantivy already
//! ships.

use std::path::Path;
use std::sync::Arc;

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use memsearch_core::Error;

const TOKENIZER_NAME: &str = "multilingual";

#[derive(Debug, Clone)]
pub struct SparseHit {
    pub id: String,
    pub score: f32,
}

fn build_schema() -> (Schema, Field, Field, Field) {
    let mut builder = Schema::builder();
    let id_field = builder.add_text_field("id", STRING | STORED);
    let tenant_field = builder.add_text_field("tenant_id", STRING);
    let content_field = builder.add_text_field("content", TEXT);
    (builder.build(), id_field, tenant_field, content_field)
}

fn register_tokenizer(index: &Index, with_stemming: bool) {
    let mut builder = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(100))
        .filter(LowerCaser);
    if with_stemming {
        index
            .tokenizers()
            .register(TOKENIZER_NAME, builder.filter(Stemmer::new(Language::English)).build());
    } else {
        index.tokenizers().register(TOKENIZER_NAME, builder.build());
    }
}

/// A single lexical index over one logical corpus (e.g. turns or sessions).
/// Indexing happens in memory; nothing is persisted across process restarts.
pub struct SparseIndex {
    index: Index,
    id_field: Field,
    tenant_field: Field,
    content_field: Field,
    writer: IndexWriter,
    reader: IndexReader,
}

impl SparseIndex {
    pub fn new_in_memory() -> Result<Self, Error> {
        let (schema, id_field, tenant_field, content_field) = build_schema();
        let index = Index::create_in_ram(schema);
        Self::from_index(index, id_field, tenant_field, content_field)
    }

    /// Open the index rooted at `dir`, creating it if the directory is empty.
    /// Reopening an existing index (rather than always creating) lets a
    /// process restart pick back up where ingestion left off.
    pub fn new_on_disk(dir: &Path) -> Result<Self, Error> {
        let (schema, id_field, tenant_field, content_field) = build_schema();
        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| Error::Unavailable(format!("tantivy mmap directory open failed: {e}")))?;
        let index = Index::open_or_create(mmap_dir, schema)
            .map_err(|e| Error::Unavailable(format!("tantivy index open failed: {e}")))?;
        Self::from_index(index, id_field, tenant_field, content_field)
    }

    fn from_index(
        index: Index,
        id_field: Field,
        tenant_field: Field,
        content_field: Field,
    ) -> Result<Self, Error> {
        register_tokenizer(&index, true);

        let writer = index
            .writer(50_000_000)
            .map_err(|e| Error::Internal(format!("tantivy writer init failed: {e}")))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: tantivy::TantivyError| {
                Error::Internal(format!("tantivy reader init failed: {e}"))
            })?;

        Ok(Self {
            index,
            id_field,
            tenant_field,
            content_field,
            writer,
            reader,
        })
    }

    /// Index or re-index a document under `id`, scoped to `tenant_id`. Safe
    /// to call repeatedly for the same `id`: callers must `commit()`
    /// afterwards for updates to be visible, and Tantivy does not dedupe by
    /// field value on its own, so repeated indexing without deletion will
    /// surface duplicate hits.
    pub fn add_document(&mut self, id: &str, tenant_id: &str, content: &str) -> Result<(), Error> {
        self.writer
            .add_document(doc!(
                self.id_field => id,
                self.tenant_field => tenant_id,
                self.content_field => content,
            ))
            .map_err(|e| Error::Internal(format!("tantivy add_document failed: {e}")))?;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), Error> {
        self.writer
            .commit()
            .map_err(|e| Error::Internal(format!("tantivy commit failed: {e}")))?;
        self.reader
            .reload()
            .map_err(|e| Error::Internal(format!("tantivy reload failed: {e}")))?;
        Ok(())
    }

    /// Search within a single tenant's documents only. There is no path in
    /// this module that issues a query without a tenant id, mirroring the
    /// fail-closed filter builder used by the dense channel.
    pub fn search(&self, query: &str, tenant_id: &str, limit: usize) -> Result<Vec<SparseHit>, Error> {
        if tenant_id.trim().is_empty() {
            return Err(Error::Invariant("tenant_missing".to_string()));
        }

        let searcher = self.reader.searcher();
        let mut parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        parser.set_conjunction_by_default();

        let content_query = parser
            .parse_query(&escape_query(query))
            .map_err(|e| Error::BadInput(format!("invalid sparse query: {e}")))?;

        let tenant_query: Box<dyn Query> = Box::new(TermQuery::new(
            Term::from_field_text(self.tenant_field, tenant_id),
            IndexRecordOption::Basic,
        ));

        let combined = BooleanQuery::new(vec![
            (Occur::Must, tenant_query),
            (Occur::Must, content_query),
        ]);

        let top_docs = searcher
            .search(&combined, &TopDocs::with_limit(limit))
            .map_err(|e| Error::Unavailable(format!("tantivy search failed: {e}")))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| Error::Unavailable(format!("tantivy doc fetch failed: {e}")))?;
            let id = retrieved
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            hits.push(SparseHit { id, score });
        }
        Ok(hits)
    }
}

/// Tantivy's query parser treats these characters as syntax; escape them so
/// free-text user queries never fail to parse.
fn escape_query(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(
            c,
            '+' | '-' | '&' | '|' | '!' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '"' | '~' | '*' | '?' | ':' | '\\' | '/'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Thread-safe handle shared across request tasks. Writes are expected to
/// happen off the hot path (ingestion), reads happen per search call.
pub type SharedSparseIndex = Arc<tokio::sync::RwLock<SparseIndex>>;

pub fn shared_in_memory() -> Result<SharedSparseIndex, Error> {
    Ok(Arc::new(tokio::sync::RwLock::new(SparseIndex::new_in_memory()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexes_and_finds_matching_document() {
        let mut index = SparseIndex::new_in_memory().unwrap();
        index
            .add_document("doc1", "acme", "gold loan interest rate increased last quarter")
            .unwrap();
        index
            .add_document("doc2", "acme", "restaurant menu and pricing details")
            .unwrap();
        index.commit().unwrap();

        let hits = index.search("gold loan interest", "acme", 10).unwrap();
        assert_eq!(hits[0].id, "doc1");
    }

    #[test]
    fn stemming_matches_inflected_forms() {
        let mut index = SparseIndex::new_in_memory().unwrap();
        index
            .add_document("doc1", "acme", "running quickly through the park")
            .unwrap();
        index.commit().unwrap();

        let hits = index.search("run", "acme", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "doc1");
    }

    #[test]
    fn query_with_special_characters_does_not_error() {
        let mut index = SparseIndex::new_in_memory().unwrap();
        index
            .add_document("doc1", "acme", "what about (interest) rates?")
            .unwrap();
        index.commit().unwrap();

        let result = index.search("(interest) rate?", "acme", 10);
        assert!(result.is_ok());
    }

    #[test]
    fn empty_index_returns_no_hits() {
        let index = SparseIndex::new_in_memory().unwrap();
        let hits = index.search("anything", "acme", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn cross_tenant_documents_are_not_returned() {
        let mut index = SparseIndex::new_in_memory().unwrap();
        index
            .add_document("doc1", "tenant-a", "paris is the capital of france")
            .unwrap();
        index
            .add_document("doc2", "tenant-b", "paris is the capital of france")
            .unwrap();
        index.commit().unwrap();

        let hits = index.search("capital of france", "tenant-a", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "doc1");
    }

    #[test]
    fn empty_tenant_id_fails_closed() {
        let index = SparseIndex::new_in_memory().unwrap();
        let err = index.search("anything", "", 10).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[test]
    fn on_disk_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut index = SparseIndex::new_on_disk(dir.path()).unwrap();
            index
                .add_document("doc1", "acme", "gold loan interest rate increased last quarter")
                .unwrap();
            index.commit().unwrap();
        }

        let index = SparseIndex::new_on_disk(dir.path()).unwrap();
        let hits = index.search("gold loan interest", "acme", 10).unwrap();
        assert_eq!(hits[0].id, "doc1");
    }
}
