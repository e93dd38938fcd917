//! SQLite-backed [`VectorStore`].
//!
//! Vectors live in the `vectors` table next to the relational data:
//! `(namespace, id)` primary key, little-endian `f32` BLOB embedding and a
//! JSON metadata column. Similarity search loads the namespace and ranks
//! by cosine similarity in process, which is fine for a branch-sized
//! knowledge base.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::{Metadata, VectorMatch, VectorRecord, VectorStore};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Corrupt metadata reads as empty, so the record is treated as stale and
/// rewritten on the next sync.
fn parse_metadata(namespace: &str, id: &str, raw: &str) -> Metadata {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(namespace, id, error = %e, "unreadable vector metadata");
        Metadata::new()
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn fetch(&self, namespace: &str, ids: &[String]) -> Result<HashMap<String, Metadata>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, metadata_json FROM vectors WHERE namespace = ");
        qb.push_bind(namespace);
        qb.push(" AND id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let id: String = row.get("id");
                let raw: String = row.get("metadata_json");
                let metadata = parse_metadata(namespace, &id, &raw);
                (id, metadata)
            })
            .collect())
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for record in records {
            let metadata_json = serde_json::to_string(&record.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO vectors (namespace, id, embedding, dims, metadata_json, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(namespace, id) DO UPDATE SET
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    metadata_json = excluded.metadata_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(namespace)
            .bind(&record.id)
            .bind(vec_to_blob(&record.values))
            .bind(record.values.len() as i64)
            .bind(metadata_json)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let rows = sqlx::query("SELECT id, embedding FROM vectors WHERE namespace = ?")
            .bind(namespace)
            .fetch_all(&self.pool)
            .await?;

        let mut matches: Vec<VectorMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                VectorMatch {
                    id: row.get("id"),
                    score: cosine_similarity(vector, &blob_to_vec(&blob)),
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM vectors WHERE namespace = ");
        qb.push_bind(namespace);
        qb.push(" AND id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn list_ids(&self, namespace: &str) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM vectors WHERE namespace = ? ORDER BY id")
                .bind(namespace)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}
