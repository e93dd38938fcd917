//! Namespaced vector storage abstraction.
//!
//! The [`VectorStore`] trait is the boundary the synchronizer and retriever
//! talk to. Every operation is scoped to a namespace (one per branch), so a
//! query can never see another branch's vectors.
//!
//! | Provider | Type | Notes |
//! |----------|------|-------|
//! | `sqlite` | [`SqliteVectorStore`] | `vectors` table, brute-force cosine |
//! | `pinecone` | [`PineconeStore`] | serverless index over REST |
//! | `memory` | [`InMemoryVectorStore`] | process-local, for tests and dry runs |
//!
//! Stores do not batch; callers split work into `vector_store.batch_size`
//! pieces (see [`crate::sync`]).

pub mod memory;
pub mod pinecone;
pub mod sqlite;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::VectorStoreConfig;
use crate::models::TextChunk;

pub use memory::InMemoryVectorStore;
pub use pinecone::PineconeStore;
pub use sqlite::SqliteVectorStore;

/// Metadata attached to a stored vector.
pub type Metadata = Map<String, Value>;

/// Metadata key holding the chunk text.
pub const META_TEXT: &str = "text";
/// Metadata key holding the chunk content hash.
pub const META_CONTENT_HASH: &str = "content_hash";

/// A vector plus its metadata, as written by an upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Metadata,
}

/// A similarity-search hit.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    /// Metadata for the given IDs. IDs that are not stored are absent from
    /// the map.
    async fn fetch(&self, namespace: &str, ids: &[String]) -> Result<HashMap<String, Metadata>>;

    /// Insert or overwrite records by ID.
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()>;

    /// Top-`top_k` matches by similarity, best first.
    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize)
        -> Result<Vec<VectorMatch>>;

    /// Delete records by ID. Unknown IDs are ignored.
    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()>;

    /// Every ID stored in the namespace.
    async fn list_ids(&self, namespace: &str) -> Result<Vec<String>>;
}

/// Build the upsert record for an embedded chunk.
///
/// Metadata keys are fixed: `restaurant_id`, `branch_id`, `source`,
/// `category`, `item_key`, `item_index`, `text`, `content_hash`.
pub fn record_for_chunk(chunk: &TextChunk) -> Result<VectorRecord> {
    let values = chunk
        .embedding
        .clone()
        .ok_or_else(|| anyhow!("chunk {} has no embedding", chunk.id))?;

    let meta = &chunk.metadata;
    let mut metadata = Metadata::new();
    metadata.insert("restaurant_id".into(), Value::from(meta.restaurant_id.clone()));
    metadata.insert("branch_id".into(), Value::from(meta.branch_id.clone()));
    metadata.insert("source".into(), Value::from(meta.source.clone()));
    metadata.insert("category".into(), Value::from(meta.category.as_str()));
    metadata.insert("item_key".into(), Value::from(meta.item_key.clone()));
    metadata.insert("item_index".into(), Value::from(meta.item_index));
    metadata.insert(META_TEXT.into(), Value::from(chunk.text.clone()));
    metadata.insert(META_CONTENT_HASH.into(), Value::from(chunk.content_hash.clone()));

    Ok(VectorRecord {
        id: chunk.id.clone(),
        values,
        metadata,
    })
}

/// String metadata field, if present.
pub fn meta_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(|v| v.as_str())
}

/// Create the configured [`VectorStore`].
///
/// The SQLite store shares the relational pool. `dims` is only used when a
/// Pinecone index has to be created.
pub async fn create_vector_store(
    config: &VectorStoreConfig,
    dims: usize,
    pool: &SqlitePool,
) -> Result<Arc<dyn VectorStore>> {
    match config.provider.as_str() {
        "sqlite" => Ok(Arc::new(SqliteVectorStore::new(pool.clone()))),
        "memory" => Ok(Arc::new(InMemoryVectorStore::new())),
        "pinecone" => Ok(Arc::new(PineconeStore::connect(config, dims).await?)),
        other => anyhow::bail!("Unknown vector store provider: {}", other),
    }
}
