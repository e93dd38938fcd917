//! Background indexing of branch knowledge documents.
//!
//! An index job takes one knowledge document through the whole pipeline:
//!
//! ```text
//! chunk → assign identity → plan against store → embed pending → upsert → (prune)
//! ```
//!
//! and moves the chatbot `building → active | error`.
//!
//! Jobs are submitted to an [`IndexQueue`], which keeps one worker task per
//! namespace. Jobs for the same namespace run one at a time in submission
//! order; jobs for different namespaces run concurrently. A worker that sits
//! idle for [`WORKER_IDLE_TIMEOUT`] exits and is started again on the next
//! submission.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::chunk::{chunk_content, ChunkWarning};
use crate::embedding::{embed_chunks, Embedder};
use crate::identity::{assign_identity, document_hash};
use crate::models::ChatbotStatus;
use crate::records::RecordStore;
use crate::sync::{apply_plan, plan_sync, prune_orphans, SyncReport};
use crate::vector_store::VectorStore;

/// Shared clients and limits used by every index job.
pub struct IndexContext {
    pub records: RecordStore,
    pub vectors: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub embed_batch_size: usize,
    pub vector_batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct IndexJob {
    pub chatbot_id: String,
    pub restaurant_id: String,
    pub branch_id: String,
    pub namespace: String,
    pub content: serde_json::Value,
    /// Delete vectors in the namespace that this document no longer produces.
    pub prune: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub chatbot_id: String,
    pub namespace: String,
    pub version: i64,
    pub sync: SyncReport,
    pub warnings: Vec<ChunkWarning>,
}

/// Run one job to completion, recording the outcome on the chatbot.
pub async fn run_index_job(ctx: &IndexContext, job: IndexJob) -> Result<IndexReport> {
    ctx.records
        .set_chatbot_status(&job.chatbot_id, ChatbotStatus::Building)
        .await?;

    match index_document(ctx, &job).await {
        Ok(report) => {
            tracing::info!(
                chatbot_id = %job.chatbot_id,
                namespace = %job.namespace,
                version = report.version,
                total = report.sync.total,
                upserted = report.sync.upserted,
                unchanged = report.sync.unchanged,
                pruned = report.sync.pruned,
                "indexing complete"
            );
            Ok(report)
        }
        Err(e) => {
            tracing::error!(
                chatbot_id = %job.chatbot_id,
                namespace = %job.namespace,
                error = %e,
                "indexing failed"
            );
            if let Err(status_err) = ctx
                .records
                .set_chatbot_status(&job.chatbot_id, ChatbotStatus::Error)
                .await
            {
                tracing::error!(chatbot_id = %job.chatbot_id, error = %status_err, "failed to record error status");
            }
            Err(e)
        }
    }
}

async fn index_document(ctx: &IndexContext, job: &IndexJob) -> Result<IndexReport> {
    let output = chunk_content(&job.content)?;
    for warning in &output.warnings {
        tracing::warn!(namespace = %job.namespace, path = %warning.path, reason = %warning.reason, "skipped content item");
    }

    let mut chunks = output.chunks;
    assign_identity(&mut chunks, &job.restaurant_id, &job.branch_id);

    let mut plan = plan_sync(
        ctx.vectors.as_ref(),
        &job.namespace,
        chunks,
        ctx.vector_batch_size,
    )
    .await?;

    if !plan.is_noop() {
        embed_chunks(ctx.embedder.as_ref(), &mut plan.pending, ctx.embed_batch_size).await?;
    }

    let mut sync = apply_plan(ctx.vectors.as_ref(), &plan, ctx.vector_batch_size).await?;

    if job.prune {
        sync.pruned = prune_orphans(
            ctx.vectors.as_ref(),
            &job.namespace,
            &plan.chunk_ids,
            ctx.vector_batch_size,
        )
        .await?;
    }

    let chatbot = ctx
        .records
        .mark_indexed(&job.chatbot_id, &document_hash(&job.content))
        .await?;
    ctx.records.set_has_chatbot(&job.branch_id, true).await?;

    Ok(IndexReport {
        chatbot_id: job.chatbot_id.clone(),
        namespace: job.namespace.clone(),
        version: chatbot.version,
        sync,
        warnings: output.warnings,
    })
}

struct QueuedJob {
    job: IndexJob,
    done: oneshot::Sender<Result<IndexReport>>,
}

/// How long a namespace worker waits for another job before exiting.
pub const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

type Workers = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<QueuedJob>>>>;

/// Per-namespace serial job queue.
pub struct IndexQueue {
    ctx: Arc<IndexContext>,
    workers: Workers,
    idle_timeout: Duration,
}

impl IndexQueue {
    pub fn new(ctx: Arc<IndexContext>) -> Self {
        Self::with_idle_timeout(ctx, WORKER_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(ctx: Arc<IndexContext>, idle_timeout: Duration) -> Self {
        Self {
            ctx,
            workers: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Enqueue a job. The receiver resolves when the job finishes; dropping
    /// it does not cancel the job.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, job: IndexJob) -> Result<oneshot::Receiver<Result<IndexReport>>> {
        let (done, rx) = oneshot::channel();
        let namespace = job.namespace.clone();
        let mut queued = QueuedJob { job, done };

        let mut workers = self
            .workers
            .lock()
            .map_err(|_| anyhow::anyhow!("index queue lock poisoned"))?;

        if let Some(sender) = workers.get(&namespace) {
            match sender.send(queued) {
                Ok(()) => return Ok(rx),
                // Worker gone; start a fresh one below.
                Err(mpsc::error::SendError(returned)) => queued = returned,
            }
        }

        let sender = self.spawn_worker(namespace.clone());
        sender
            .send(queued)
            .map_err(|_| anyhow::anyhow!("index worker for {} exited", namespace))?;
        workers.insert(namespace, sender);
        Ok(rx)
    }

    /// Number of namespaces with a live worker.
    pub fn active_workers(&self) -> usize {
        self.workers.lock().map(|w| w.len()).unwrap_or(0)
    }

    fn spawn_worker(&self, namespace: String) -> mpsc::UnboundedSender<QueuedJob> {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedJob>();
        let ctx = Arc::clone(&self.ctx);
        let workers = Arc::clone(&self.workers);
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            tracing::debug!(%namespace, "index worker started");
            loop {
                let next = match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(queued)) => queued,
                    Ok(None) => break,
                    Err(_) => match take_or_retire(&workers, &namespace, &mut rx) {
                        Some(queued) => queued,
                        None => {
                            tracing::debug!(%namespace, "index worker idle, exiting");
                            break;
                        }
                    },
                };
                let QueuedJob { job, done } = next;
                let result = run_index_job(&ctx, job).await;
                let _ = done.send(result);
            }
        });

        tx
    }
}

/// Deregister an idle worker, unless a job arrived after the timeout fired.
/// Runs under the map lock so no submit can slip in between.
fn take_or_retire(
    workers: &Workers,
    namespace: &str,
    rx: &mut mpsc::UnboundedReceiver<QueuedJob>,
) -> Option<QueuedJob> {
    let mut map = workers.lock().ok()?;
    match rx.try_recv() {
        Ok(queued) => Some(queued),
        Err(_) => {
            map.remove(namespace);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chatbot;
    use crate::vector_store::InMemoryVectorStore;
    use crate::{db, migrate};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FakeEmbedder {
        texts_embedded: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                anyhow::bail!("embedding quota exceeded");
            }
            self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0, 0.5])
                .collect())
        }
    }

    struct Fixture {
        _dir: TempDir,
        ctx: Arc<IndexContext>,
        embedder: Arc<FakeEmbedder>,
        vectors: Arc<InMemoryVectorStore>,
        chatbot: Chatbot,
        branch_id: String,
        restaurant_id: String,
    }

    async fn fixture(fail: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let pool = db::connect_path(&dir.path().join("i.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let records = RecordStore::new(pool);
        let r = records.create_restaurant("Casa", "", "o").await.unwrap();
        let b = records.create_branch(&r.id, "Main Street", "").await.unwrap();
        let chatbot = records.get_or_create_chatbot(&b.id).await.unwrap();

        let embedder = Arc::new(FakeEmbedder {
            texts_embedded: AtomicUsize::new(0),
            fail,
        });
        let vectors = Arc::new(InMemoryVectorStore::new());
        let ctx = Arc::new(IndexContext {
            records,
            vectors: vectors.clone(),
            embedder: embedder.clone(),
            embed_batch_size: 32,
            vector_batch_size: 100,
        });
        Fixture {
            _dir: dir,
            ctx,
            embedder,
            vectors,
            chatbot,
            branch_id: b.id,
            restaurant_id: r.id,
        }
    }

    fn job(f: &Fixture, content: serde_json::Value, prune: bool) -> IndexJob {
        IndexJob {
            chatbot_id: f.chatbot.id.clone(),
            restaurant_id: f.restaurant_id.clone(),
            branch_id: f.branch_id.clone(),
            namespace: format!("{}_Main_Street", f.restaurant_id),
            content,
            prune,
        }
    }

    #[tokio::test]
    async fn test_index_activates_chatbot() {
        let f = fixture(false).await;
        let content = json!({"hours": "9am-5pm", "appetizers": ["Soup", "Salad"]});
        let report = run_index_job(&f.ctx, job(&f, content, false)).await.unwrap();

        assert_eq!(report.sync.upserted, 3);
        assert_eq!(report.version, 1);
        let bot = f.ctx.records.get_chatbot(&f.chatbot.id).await.unwrap().unwrap();
        assert_eq!(bot.status, ChatbotStatus::Active);
        let branch = f.ctx.records.get_branch(&f.branch_id).await.unwrap().unwrap();
        assert!(branch.has_chatbot);
    }

    #[tokio::test]
    async fn test_unchanged_chunks_are_not_embedded_again() {
        let f = fixture(false).await;
        let content = json!({"hours": "9am-5pm", "appetizers": ["Soup", "Salad"]});
        run_index_job(&f.ctx, job(&f, content.clone(), false)).await.unwrap();
        assert_eq!(f.embedder.texts_embedded.load(Ordering::SeqCst), 3);

        let report = run_index_job(&f.ctx, job(&f, content, false)).await.unwrap();
        assert_eq!(report.sync.unchanged, 3);
        assert_eq!(report.version, 1);
        assert_eq!(f.embedder.texts_embedded.load(Ordering::SeqCst), 3);

        let edited = json!({"hours": "10am-6pm", "appetizers": ["Soup", "Salad"]});
        let report = run_index_job(&f.ctx, job(&f, edited, false)).await.unwrap();
        assert_eq!(report.sync.updated, 1);
        assert_eq!(report.version, 2);
        assert_eq!(f.embedder.texts_embedded.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_prune_removes_dropped_items() {
        let f = fixture(false).await;
        run_index_job(&f.ctx, job(&f, json!({"menu": ["a", "b", "c"]}), false))
            .await
            .unwrap();
        let ns = format!("{}_Main_Street", f.restaurant_id);

        run_index_job(&f.ctx, job(&f, json!({"menu": ["a"]}), false))
            .await
            .unwrap();
        assert_eq!(f.vectors.len(&ns), 3);

        let report = run_index_job(&f.ctx, job(&f, json!({"menu": ["a"]}), true))
            .await
            .unwrap();
        assert_eq!(report.sync.pruned, 2);
        assert_eq!(f.vectors.len(&ns), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_marks_error() {
        let f = fixture(true).await;
        let result = run_index_job(&f.ctx, job(&f, json!({"hours": "9-5"}), false)).await;
        assert!(result.is_err());
        let bot = f.ctx.records.get_chatbot(&f.chatbot.id).await.unwrap().unwrap();
        assert_eq!(bot.status, ChatbotStatus::Error);
        assert_eq!(f.vectors.len(&format!("{}_Main_Street", f.restaurant_id)), 0);
    }

    #[tokio::test]
    async fn test_non_object_content_marks_error() {
        let f = fixture(false).await;
        assert!(run_index_job(&f.ctx, job(&f, json!(["x"]), false)).await.is_err());
        let bot = f.ctx.records.get_chatbot(&f.chatbot.id).await.unwrap().unwrap();
        assert_eq!(bot.status, ChatbotStatus::Error);
    }

    #[tokio::test]
    async fn test_queue_runs_same_namespace_in_order() {
        let f = fixture(false).await;
        let queue = IndexQueue::new(f.ctx.clone());

        let first = queue
            .submit(job(&f, json!({"hours": "9-5"}), false))
            .unwrap();
        let second = queue
            .submit(job(&f, json!({"hours": "10-6"}), false))
            .unwrap();

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(second.sync.updated, 1);

        let bot = f.ctx.records.get_chatbot(&f.chatbot.id).await.unwrap().unwrap();
        assert_eq!(bot.content_hash, Some(document_hash(&json!({"hours": "10-6"}))));
    }

    #[tokio::test]
    async fn test_idle_worker_exits_and_restarts() {
        let f = fixture(false).await;
        let queue = IndexQueue::with_idle_timeout(f.ctx.clone(), Duration::from_millis(50));

        let report = queue
            .submit(job(&f, json!({"hours": "9-5"}), false))
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.version, 1);
        assert_eq!(queue.active_workers(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(queue.active_workers(), 0);

        let report = queue
            .submit(job(&f, json!({"hours": "10-6"}), false))
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.version, 2);
    }
}
