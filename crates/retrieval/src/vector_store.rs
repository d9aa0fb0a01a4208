//! Qdrant-backed vector store client (component A).
//!
//! Wraps named dense / sparse / multi-vector fields on a single collection
//! schema and exposes one search method per channel. Fusion across channels
//! is the hybrid retriever's job (component G), not this client's — keeping
//! RRF client-side lets the fusion math match the spec's rank convention
//! exactly rather than whatever a server-side fusion endpoint happens to do.

use std::collections::HashMap;

use qdrant_client::qdrant::{
    value::Kind, Condition, CreateCollectionBuilder, Distance, FieldCondition,
    Filter as QdrantFilter, Match, NamedVectors, PointStruct, Range as QdrantRange,
    SearchPointsBuilder, Value as QdrantValue, VectorParamsBuilder, VectorParamsMap,
};
use qdrant_client::Qdrant;

use memsearch_config::{DistanceMetric, VectorStoreConfig};
use memsearch_core::{Predicate, StoreFilter};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("qdrant connection error: {0}")]
    Connection(String),
    #[error("qdrant request error: {0}")]
    Request(String),
    #[error("collection not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for memsearch_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => memsearch_core::Error::NotFound(id),
            other => memsearch_core::Error::Unavailable(other.to_string()),
        }
    }
}

impl From<DistanceMetric> for Distance {
    fn from(metric: DistanceMetric) -> Self {
        match metric {
            DistanceMetric::Cosine => Distance::Cosine,
            DistanceMetric::Dot => Distance::Dot,
            DistanceMetric::Euclidean => Distance::Euclid,
        }
    }
}

/// A single scored hit returned from one retrieval channel, before fusion.
#[derive(Debug, Clone)]
pub struct StoreHit {
    pub id: String,
    pub score: f32,
    pub payload: HashMap<String, String>,
}

pub struct VectorStore {
    client: Qdrant,
    config: VectorStoreConfig,
}

impl VectorStore {
    pub fn new(config: VectorStoreConfig) -> Result<Self, StoreError> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(ref key) = config.api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        tracing::info!(endpoint = %config.endpoint, "connected to qdrant");
        Ok(Self { client, config })
    }

    /// Create the turns collection with dense + sparse + multi-vector named
    /// fields, if it does not already exist.
    pub async fn ensure_collections(&self) -> Result<(), StoreError> {
        for collection in [&self.config.turns_collection, &self.config.sessions_collection] {
            let exists = self
                .client
                .collection_exists(collection)
                .await
                .map_err(|e| StoreError::Request(e.to_string()))?;
            if exists {
                continue;
            }

            tracing::info!(collection = %collection, "creating collection");

            let dense_params = VectorParamsBuilder::new(
                self.config.dense_dim as u64,
                Distance::from(self.config.distance),
            );
            let multi_params = VectorParamsBuilder::new(
                self.config.multi_vector_dim as u64,
                Distance::from(self.config.distance),
            );
            let mut named = std::collections::HashMap::new();
            named.insert(self.config.dense_vector_name.clone(), dense_params.build());
            named.insert(self.config.multi_vector_name.clone(), multi_params.build());

            // The sparse/lexical channel is served by a separate Tantivy
            // index (see sparse_search.rs), not a Qdrant sparse vector field.
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(collection)
                        .vectors_config(VectorParamsMap { map: named }),
                )
                .await
                .map_err(|e| StoreError::Request(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn upsert_dense(
        &self,
        collection: &str,
        id: &str,
        dense: Vec<f32>,
        payload: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut vectors = NamedVectors::default();
        vectors.vectors.insert(
            self.config.dense_vector_name.clone(),
            qdrant_client::qdrant::Vector::from(dense),
        );

        let mut point_payload: HashMap<String, QdrantValue> = HashMap::new();
        for (k, v) in payload {
            point_payload.insert(k.clone(), v.clone().into());
        }

        let point = PointStruct::new(id.to_string(), vectors, point_payload);

        self.client
            .upsert_points(qdrant_client::qdrant::UpsertPointsBuilder::new(
                collection,
                vec![point],
            ))
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Ok(())
    }

    /// Dense nearest-neighbor search against the named dense vector field.
    pub async fn search_dense(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
        filter: Option<&StoreFilter>,
    ) -> Result<Vec<StoreHit>, StoreError> {
        let mut builder =
            SearchPointsBuilder::new(collection, query.to_vec(), limit as u64)
                .vector_name(self.config.dense_vector_name.clone())
                .with_payload(true);

        if let Some(f) = filter {
            builder = builder.filter(to_qdrant_filter(f));
        }

        self.run_search(builder).await
    }

    /// Late-interaction (multi-vector) search against the ColBERT-style field.
    pub async fn search_multi_vector(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
        filter: Option<&StoreFilter>,
    ) -> Result<Vec<StoreHit>, StoreError> {
        let mut builder =
            SearchPointsBuilder::new(collection, query.to_vec(), limit as u64)
                .vector_name(self.config.multi_vector_name.clone())
                .with_payload(true);

        if let Some(f) = filter {
            builder = builder.filter(to_qdrant_filter(f));
        }

        self.run_search(builder).await
    }

    async fn run_search(
        &self,
        builder: SearchPointsBuilder,
    ) -> Result<Vec<StoreHit>, StoreError> {
        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let mut payload = HashMap::new();
                for (k, v) in point.payload {
                    if let Some(Kind::StringValue(s)) = v.kind {
                        payload.insert(k, s);
                    }
                }
                let id = point
                    .id
                    .map(|pid| match pid.point_id_options {
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => u,
                        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => {
                            n.to_string()
                        }
                        None => String::new(),
                    })
                    .unwrap_or_default();

                StoreHit {
                    id,
                    score: point.score,
                    payload,
                }
            })
            .collect())
    }

    pub fn turns_collection(&self) -> &str {
        &self.config.turns_collection
    }

    pub fn sessions_collection(&self) -> &str {
        &self.config.sessions_collection
    }
}

/// Translate a core `StoreFilter` (which always carries a tenant predicate
/// first, per the fail-closed invariant enforced in `memsearch_core::filter`)
/// into a Qdrant `Filter`.
fn to_qdrant_filter(filter: &StoreFilter) -> QdrantFilter {
    let conditions: Vec<Condition> = filter
        .predicates()
        .iter()
        .map(|p| match p {
            Predicate::Equals { field, value } => Condition {
                condition_one_of: Some(qdrant_client::qdrant::condition::ConditionOneOf::Field(
                    FieldCondition {
                        key: field.clone(),
                        r#match: Some(Match {
                            match_value: Some(
                                qdrant_client::qdrant::r#match::MatchValue::Keyword(value.clone()),
                            ),
                        }),
                        ..Default::default()
                    },
                )),
            },
            Predicate::Range { field, start, end } => Condition {
                condition_one_of: Some(qdrant_client::qdrant::condition::ConditionOneOf::Field(
                    FieldCondition {
                        key: field.clone(),
                        range: Some(QdrantRange {
                            gte: Some(*start),
                            lte: Some(*end),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                )),
            },
        })
        .collect();

    QdrantFilter {
        must: conditions,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memsearch_core::{filter, RawFilters};

    #[test]
    fn translates_tenant_and_optional_predicates() {
        let raw = RawFilters::tenant("acme").with_session_id("s1");
        let store_filter = filter::build(&raw).unwrap();
        let qdrant_filter = to_qdrant_filter(&store_filter);
        assert_eq!(qdrant_filter.must.len(), 2);
    }
}
