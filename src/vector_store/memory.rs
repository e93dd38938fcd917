//! In-memory [`VectorStore`] for tests and dry runs.
//!
//! Namespaces map to `HashMap`s behind a `std::sync::RwLock`. Query is
//! brute-force cosine similarity.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{Metadata, VectorMatch, VectorRecord, VectorStore};
use crate::embedding::cosine_similarity;

type Namespaces = HashMap<String, HashMap<String, VectorRecord>>;

pub struct InMemoryVectorStore {
    namespaces: RwLock<Namespaces>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records in a namespace.
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .map(|ns| ns.get(namespace).map_or(0, |m| m.len()))
            .unwrap_or(0)
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory vector store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, namespace: &str, ids: &[String]) -> Result<HashMap<String, Metadata>> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        let Some(records) = namespaces.get(namespace) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| records.get(id).map(|r| (id.clone(), r.metadata.clone())))
            .collect())
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        let mut namespaces = self.namespaces.write().map_err(poisoned)?;
        let stored = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        let Some(records) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<VectorMatch> = records
            .values()
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
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
        let mut namespaces = self.namespaces.write().map_err(poisoned)?;
        if let Some(records) = namespaces.get_mut(namespace) {
            for id in ids {
                records.remove(id);
            }
        }
        Ok(())
    }

    async fn list_ids(&self, namespace: &str) -> Result<Vec<String>> {
        let namespaces = self.namespaces.read().map_err(poisoned)?;
        let mut ids: Vec<String> = namespaces
            .get(namespace)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }
}
