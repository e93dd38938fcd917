//! Vector store synchronizer.
//!
//! Brings a namespace in line with the chunks produced from the current
//! knowledge document while doing as little provider work as possible:
//!
//! 1. Fetch the stored `content_hash` for exactly the chunk IDs, in batches.
//! 2. Classify every chunk as new (ID not stored), updated (hash differs)
//!    or unchanged.
//! 3. Embed only new and updated chunks (the caller does this between
//!    [`plan_sync`] and [`apply_plan`]).
//! 4. Upsert them in batches with the full chunk metadata.
//!
//! Nothing is deleted implicitly. [`delete_vectors`] removes explicit IDs
//! and [`prune_orphans`] removes every ID in the namespace that the current
//! document no longer produces.
//!
//! A failed fetch or upsert aborts the run. Batches already written stay
//! written; rerunning the same document finishes the job because unchanged
//! chunks are skipped.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::Serialize;

use crate::models::TextChunk;
use crate::vector_store::{meta_str, record_for_chunk, VectorRecord, VectorStore, META_CONTENT_HASH};

/// Counters for one synchronization run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SyncReport {
    /// Chunks produced by the document.
    pub total: usize,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records written to the store (`new + updated` on success).
    pub upserted: usize,
    /// Records removed by pruning.
    pub pruned: usize,
}

/// Classification of a chunk set against a namespace.
#[derive(Debug)]
pub struct SyncPlan {
    pub namespace: String,
    /// New and updated chunks, in input order. These need embeddings before
    /// [`apply_plan`].
    pub pending: Vec<TextChunk>,
    /// Every chunk ID in the document, stored or not.
    pub chunk_ids: Vec<String>,
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl SyncPlan {
    pub fn is_noop(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Stored content hashes for `ids`, fetched `batch_size` IDs at a time.
///
/// IDs that are not stored, or stored without a hash, are absent.
pub async fn fetch_existing_hashes(
    store: &dyn VectorStore,
    namespace: &str,
    ids: &[String],
    batch_size: usize,
) -> Result<HashMap<String, String>> {
    let mut hashes = HashMap::with_capacity(ids.len());

    for batch in ids.chunks(batch_size.max(1)) {
        let fetched = store.fetch(namespace, batch).await?;
        for (id, metadata) in fetched {
            if let Some(hash) = meta_str(&metadata, META_CONTENT_HASH) {
                hashes.insert(id, hash.to_string());
            }
        }
    }

    Ok(hashes)
}

/// Classify chunks (with identity already assigned) against the store.
pub async fn plan_sync(
    store: &dyn VectorStore,
    namespace: &str,
    chunks: Vec<TextChunk>,
    batch_size: usize,
) -> Result<SyncPlan> {
    let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    let existing = fetch_existing_hashes(store, namespace, &chunk_ids, batch_size).await?;

    let mut plan = SyncPlan {
        namespace: namespace.to_string(),
        pending: Vec::new(),
        chunk_ids,
        new: 0,
        updated: 0,
        unchanged: 0,
    };

    for chunk in chunks {
        match existing.get(&chunk.id) {
            None => {
                plan.new += 1;
                plan.pending.push(chunk);
            }
            Some(hash) if *hash != chunk.content_hash => {
                plan.updated += 1;
                plan.pending.push(chunk);
            }
            Some(_) => plan.unchanged += 1,
        }
    }

    tracing::debug!(
        namespace,
        new = plan.new,
        updated = plan.updated,
        unchanged = plan.unchanged,
        "sync plan"
    );
    Ok(plan)
}

/// Upsert the plan's pending chunks in batches of `batch_size`.
///
/// Every pending chunk must carry an embedding.
pub async fn apply_plan(
    store: &dyn VectorStore,
    plan: &SyncPlan,
    batch_size: usize,
) -> Result<SyncReport> {
    let records: Vec<VectorRecord> = plan
        .pending
        .iter()
        .map(record_for_chunk)
        .collect::<Result<_>>()?;

    let mut upserted = 0;
    for batch in records.chunks(batch_size.max(1)) {
        store.upsert(&plan.namespace, batch).await?;
        upserted += batch.len();
        tracing::debug!(namespace = %plan.namespace, upserted, "upserted batch");
    }

    Ok(SyncReport {
        total: plan.chunk_ids.len(),
        new: plan.new,
        updated: plan.updated,
        unchanged: plan.unchanged,
        upserted,
        pruned: 0,
    })
}

/// Plan and apply in one step for chunks that are already embedded.
pub async fn sync_chunks(
    store: &dyn VectorStore,
    namespace: &str,
    chunks: Vec<TextChunk>,
    batch_size: usize,
) -> Result<SyncReport> {
    let plan = plan_sync(store, namespace, chunks, batch_size).await?;
    apply_plan(store, &plan, batch_size).await
}

/// Delete explicit IDs in batches. Returns how many IDs were submitted.
pub async fn delete_vectors(
    store: &dyn VectorStore,
    namespace: &str,
    ids: &[String],
    batch_size: usize,
) -> Result<usize> {
    let mut deleted = 0;
    for batch in ids.chunks(batch_size.max(1)) {
        store.delete(namespace, batch).await?;
        deleted += batch.len();
    }
    Ok(deleted)
}

/// Delete every ID in the namespace that is not in `keep`.
pub async fn prune_orphans(
    store: &dyn VectorStore,
    namespace: &str,
    keep: &[String],
    batch_size: usize,
) -> Result<usize> {
    let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
    let orphans: Vec<String> = store
        .list_ids(namespace)
        .await?
        .into_iter()
        .filter(|id| !keep.contains(id.as_str()))
        .collect();

    if orphans.is_empty() {
        return Ok(0);
    }
    tracing::info!(namespace, count = orphans.len(), "pruning orphaned vectors");
    delete_vectors(store, namespace, &orphans, batch_size).await
}
