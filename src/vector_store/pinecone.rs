//! Pinecone [`VectorStore`] over the REST data plane.
//!
//! On connect the index is described through the control plane
//! (`api.pinecone.io`) to discover its data-plane host. A missing index is
//! created as a serverless cosine index with the embedder's dimensionality
//! and polled until it reports ready. Requires `PINECONE_API_KEY`.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{Metadata, VectorMatch, VectorRecord, VectorStore};
use crate::config::VectorStoreConfig;
use crate::http::{self, Reply};

const CONTROL_PLANE: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
const READY_POLL_ATTEMPTS: u32 = 30;

pub struct PineconeStore {
    client: Client,
    api_key: String,
    host: String,
    max_retries: u32,
}

impl PineconeStore {
    /// Describe (or create) the configured index and bind to its host.
    pub async fn connect(config: &VectorStoreConfig, dims: usize) -> Result<Self> {
        let client = http::client(config.timeout_secs)?;
        let api_key = http::api_key("PINECONE_API_KEY")?;
        let max_retries = 3;

        let describe_url = format!("{}/indexes/{}", CONTROL_PLANE, config.index_name);
        let describe = || {
            client
                .get(&describe_url)
                .header("Api-Key", &api_key)
                .header("X-Pinecone-API-Version", API_VERSION)
        };

        let mut index = match http::send_json("Pinecone describe", max_retries, describe).await? {
            Reply::Json(v) => {
                tracing::info!(index = %config.index_name, "pinecone index exists");
                v
            }
            Reply::NotFound(_) => {
                tracing::info!(index = %config.index_name, dims, "creating pinecone index");
                let body = json!({
                    "name": config.index_name,
                    "dimension": dims,
                    "metric": "cosine",
                    "spec": { "serverless": { "cloud": config.cloud, "region": config.region } },
                });
                let create_url = format!("{}/indexes", CONTROL_PLANE);
                http::send_json_ok("Pinecone create index", max_retries, || {
                    client
                        .post(&create_url)
                        .header("Api-Key", &api_key)
                        .header("X-Pinecone-API-Version", API_VERSION)
                        .json(&body)
                })
                .await?
            }
        };

        let mut attempts = 0;
        while !index_ready(&index) {
            attempts += 1;
            if attempts > READY_POLL_ATTEMPTS {
                bail!("Pinecone index {} did not become ready", config.index_name);
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
            index = http::send_json_ok("Pinecone describe", max_retries, describe).await?;
        }

        let host = index
            .get("host")
            .and_then(|h| h.as_str())
            .ok_or_else(|| anyhow::anyhow!("Pinecone index description has no host"))?;
        let host = if host.starts_with("http") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };

        Ok(Self {
            client,
            api_key,
            host,
            max_retries,
        })
    }

    async fn post(&self, label: &str, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.host, path);
        http::send_json_ok(label, self.max_retries, || {
            self.client
                .post(&url)
                .header("Api-Key", &self.api_key)
                .header("X-Pinecone-API-Version", API_VERSION)
                .json(body)
        })
        .await
    }

    async fn get(&self, label: &str, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.host, path);
        http::send_json_ok(label, self.max_retries, || {
            self.client
                .get(&url)
                .header("Api-Key", &self.api_key)
                .header("X-Pinecone-API-Version", API_VERSION)
                .query(query)
        })
        .await
    }
}

fn index_ready(index: &Value) -> bool {
    index
        .pointer("/status/ready")
        .and_then(|r| r.as_bool())
        .unwrap_or(false)
        && index.get("host").and_then(|h| h.as_str()).is_some()
}

fn parse_fetch(json: &Value) -> HashMap<String, Metadata> {
    json.get("vectors")
        .and_then(|v| v.as_object())
        .map(|vectors| {
            vectors
                .iter()
                .map(|(id, v)| {
                    let metadata = v
                        .get("metadata")
                        .and_then(|m| m.as_object())
                        .cloned()
                        .unwrap_or_default();
                    (id.clone(), metadata)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_matches(json: &Value) -> Vec<VectorMatch> {
    json.get("matches")
        .and_then(|m| m.as_array())
        .map(|matches| {
            matches
                .iter()
                .filter_map(|m| {
                    Some(VectorMatch {
                        id: m.get("id")?.as_str()?.to_string(),
                        score: m.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn name(&self) -> &str {
        "pinecone"
    }

    async fn fetch(&self, namespace: &str, ids: &[String]) -> Result<HashMap<String, Metadata>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut query: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        query.push(("namespace", namespace));
        let json = self.get("Pinecone fetch", "/vectors/fetch", &query).await?;
        Ok(parse_fetch(&json))
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let vectors: Vec<Value> = records
            .iter()
            .map(|r| json!({ "id": r.id, "values": r.values, "metadata": r.metadata }))
            .collect();
        let body = json!({ "vectors": vectors, "namespace": namespace });
        self.post("Pinecone upsert", "/vectors/upsert", &body).await?;
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let body = json!({
            "vector": vector,
            "topK": top_k,
            "namespace": namespace,
            "includeMetadata": false,
            "includeValues": false,
        });
        let json = self.post("Pinecone query", "/query", &body).await?;
        Ok(parse_matches(&json))
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = json!({ "ids": ids, "namespace": namespace });
        self.post("Pinecone delete", "/vectors/delete", &body).await?;
        Ok(())
    }

    async fn list_ids(&self, namespace: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![("namespace", namespace)];
            if let Some(t) = token.as_deref() {
                query.push(("paginationToken", t));
            }
            let json = self.get("Pinecone list", "/vectors/list", &query).await?;

            if let Some(vectors) = json.get("vectors").and_then(|v| v.as_array()) {
                ids.extend(
                    vectors
                        .iter()
                        .filter_map(|v| v.get("id").and_then(|id| id.as_str()))
                        .map(str::to_string),
                );
            }

            token = json
                .pointer("/pagination/next")
                .and_then(|n| n.as_str())
                .map(str::to_string);
            if token.is_none() {
                break;
            }
        }

        Ok(ids)
    }
}
