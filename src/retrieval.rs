//! Query-time retrieval of knowledge text for a branch.
//!
//! Runs a top-K similarity query in the branch namespace, then fetches the
//! matched records to read their `text` metadata. Context strings keep the
//! match rank order. A failed similarity query is an error; a failed fetch
//! degrades to an empty context so the chatbot can still answer.

use anyhow::Result;
use serde::Serialize;

use crate::vector_store::{meta_str, VectorMatch, VectorStore, META_TEXT};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Retrieval {
    pub matches: Vec<VectorMatch>,
    /// Chunk texts, best match first.
    pub context: Vec<String>,
}

pub async fn retrieve(
    store: &dyn VectorStore,
    namespace: &str,
    query_vector: &[f32],
    top_k: usize,
) -> Result<Retrieval> {
    let matches = store.query(namespace, query_vector, top_k).await?;
    if matches.is_empty() {
        return Ok(Retrieval::default());
    }

    let ids: Vec<String> = matches.iter().map(|m| m.id.clone()).collect();
    let fetched = match store.fetch(namespace, &ids).await {
        Ok(fetched) => fetched,
        Err(e) => {
            tracing::warn!(namespace, error = %e, "failed to fetch matched vectors; answering without context");
            return Ok(Retrieval {
                matches,
                context: Vec::new(),
            });
        }
    };

    let context = matches
        .iter()
        .filter_map(|m| fetched.get(&m.id))
        .filter_map(|metadata| meta_str(metadata, META_TEXT))
        .map(str::to_string)
        .collect();

    Ok(Retrieval { matches, context })
}
