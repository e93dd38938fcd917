//! Application service: the operations behind every HTTP route and CLI
//! command.
//!
//! | Operation | Route |
//! |-----------|-------|
//! | [`Service::create_restaurant`] | `POST /restaurants` |
//! | [`Service::list_branches`] | `GET /restaurants/{id}/branches`, `GET /branches` |
//! | [`Service::create_branch`] | `POST /branches` |
//! | [`Service::add_snapshot`] / [`Service::list_snapshots`] | `/branches/{id}/snapshots` |
//! | [`Service::create_chatbot`] | `POST /chatbots` |
//! | [`Service::get_chatbot`] | `GET /chatbots/{id}` |
//! | [`Service::reindex`] | `POST /chatbots/{id}/reindex` |
//! | [`Service::delete_vectors`] | `POST /branches/{id}/vectors/delete` |
//! | [`Service::query`] | `POST /branches/{id}/query[-with-history]` |
//!
//! All clients are injected at construction; the service holds no globals.

use std::sync::Arc;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::oneshot;

use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::embedding::{create_embedder, embed_query, Embedder};
use crate::error::{ServiceError, ServiceResult};
use crate::generation::{create_generator, Generator};
use crate::history::{ConversationStore, DEFAULT_LANGUAGE};
use crate::identity::namespace_for;
use crate::indexing::{IndexContext, IndexJob, IndexQueue, IndexReport};
use crate::migrate;
use crate::models::{Branch, Chatbot, ChatbotStatus, MenuSnapshot, Restaurant};
use crate::prompt::{compose_prompt, fallback_response, NO_INFORMATION_RESPONSE};
use crate::records::RecordStore;
use crate::retrieval::retrieve;
use crate::sync;
use crate::vector_store::{create_vector_store, VectorStore};

// ============ Requests / responses ============

#[derive(Debug, Deserialize)]
pub struct NewRestaurant {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NewBranch {
    #[serde(default)]
    pub restaurant_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct NewSnapshot {
    pub content: Value,
    pub created_by: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChatbot {
    #[serde(default)]
    pub branch_id: String,
    /// Knowledge document. Falls back to the latest snapshot when absent.
    pub content: Option<Value>,
    #[serde(default)]
    pub prune: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReindexRequest {
    pub content: Option<Value>,
    #[serde(default)]
    pub prune: bool,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub question: String,
    pub session_id: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryDebug {
    pub namespace: String,
    pub matches: usize,
    pub context_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub response: String,
    pub context: Vec<String>,
    pub debug: QueryDebug,
    pub session_id: String,
}

/// A queued index job. `done` resolves when the job finishes.
pub struct IndexSubmission {
    pub chatbot: Chatbot,
    pub done: oneshot::Receiver<anyhow::Result<IndexReport>>,
}

// ============ Service ============

pub struct Service {
    records: RecordStore,
    history: ConversationStore,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    queue: IndexQueue,
    retrieval: RetrievalConfig,
    vector_batch_size: usize,
}

impl Service {
    /// Wire a service from already-constructed clients.
    pub fn new(
        pool: SqlitePool,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        config: &Config,
    ) -> Self {
        let records = RecordStore::new(pool.clone());
        let ctx = Arc::new(IndexContext {
            records: records.clone(),
            vectors: vectors.clone(),
            embedder: embedder.clone(),
            embed_batch_size: config.embedding.batch_size,
            vector_batch_size: config.vector_store.batch_size,
        });

        Self {
            records,
            history: ConversationStore::new(pool),
            vectors,
            embedder,
            generator,
            queue: IndexQueue::new(ctx),
            retrieval: config.retrieval.clone(),
            vector_batch_size: config.vector_store.batch_size,
        }
    }

    /// Connect the database, run migrations, and build the configured
    /// providers.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;

        let embedder = create_embedder(&config.embedding).context("embedding provider")?;
        let generator = create_generator(&config.generation).context("generation provider")?;
        let vectors = create_vector_store(&config.vector_store, embedder.dims(), &pool)
            .await
            .context("vector store")?;

        tracing::info!(
            embedder = embedder.model_name(),
            generator = generator.model_name(),
            vector_store = vectors.name(),
            "providers ready"
        );
        Ok(Self::new(pool, vectors, embedder, generator, config))
    }

    // ---- restaurants & branches ----

    pub async fn create_restaurant(&self, req: NewRestaurant) -> ServiceResult<Restaurant> {
        let name = required("name", &req.name)?;
        let owner_id = required("owner_id", &req.owner_id)?;
        let restaurant = self
            .records
            .create_restaurant(name, req.description.trim(), owner_id)
            .await?;
        tracing::info!(restaurant_id = %restaurant.id, "restaurant created");
        Ok(restaurant)
    }

    /// Branches of one restaurant, or every branch when `restaurant_id` is
    /// `None`.
    pub async fn list_branches(&self, restaurant_id: Option<&str>) -> ServiceResult<Vec<Branch>> {
        if let Some(rid) = restaurant_id {
            self.restaurant(rid).await?;
        }
        Ok(self.records.list_branches(restaurant_id).await?)
    }

    pub async fn create_branch(&self, req: NewBranch) -> ServiceResult<Branch> {
        let restaurant_id = required("restaurant_id", &req.restaurant_id)?;
        let name = required("name", &req.name)?;
        self.restaurant(restaurant_id).await?;

        // Each branch owns its namespace; names that map to the same one clash.
        let namespace = namespace_for(restaurant_id, name);
        let existing = self.records.list_branches(Some(restaurant_id)).await?;
        if let Some(other) = existing
            .iter()
            .find(|b| namespace_for(&b.restaurant_id, &b.name) == namespace)
        {
            return Err(ServiceError::conflict(format!(
                "branch name {:?} maps to namespace {} already used by branch {}",
                name, namespace, other.id
            )));
        }

        let branch = self
            .records
            .create_branch(restaurant_id, name, req.address.trim())
            .await?;
        tracing::info!(branch_id = %branch.id, restaurant_id, "branch created");
        Ok(branch)
    }

    // ---- snapshots ----

    pub async fn add_snapshot(
        &self,
        branch_id: &str,
        req: NewSnapshot,
    ) -> ServiceResult<MenuSnapshot> {
        self.branch(branch_id).await?;
        ensure_object(&req.content)?;
        Ok(self
            .records
            .create_snapshot(
                branch_id,
                &req.content,
                req.created_by.as_deref(),
                req.notes.as_deref(),
            )
            .await?)
    }

    pub async fn list_snapshots(&self, branch_id: &str) -> ServiceResult<Vec<MenuSnapshot>> {
        self.branch(branch_id).await?;
        Ok(self.records.list_snapshots(branch_id).await?)
    }

    // ---- chatbots ----

    /// Create the branch chatbot, or rebuild it if it already exists, and
    /// queue an index job.
    pub async fn create_chatbot(&self, req: CreateChatbot) -> ServiceResult<IndexSubmission> {
        let branch_id = required("branch_id", &req.branch_id)?;
        let branch = self.branch(branch_id).await?;

        let chatbot = self.records.get_or_create_chatbot(branch_id).await?;

        self.submit_index(chatbot, &branch, req.content, req.prune)
            .await
    }

    pub async fn get_chatbot(&self, chatbot_id: &str) -> ServiceResult<Chatbot> {
        self.records
            .get_chatbot(chatbot_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("chatbot {} not found", chatbot_id)))
    }

    pub async fn reindex(
        &self,
        chatbot_id: &str,
        req: ReindexRequest,
    ) -> ServiceResult<IndexSubmission> {
        let chatbot = self.get_chatbot(chatbot_id).await?;
        let branch = self.branch(&chatbot.branch_id).await?;
        self.submit_index(chatbot, &branch, req.content, req.prune)
            .await
    }

    async fn submit_index(
        &self,
        chatbot: Chatbot,
        branch: &Branch,
        content: Option<Value>,
        prune: bool,
    ) -> ServiceResult<IndexSubmission> {
        let content = match content {
            Some(content) => {
                ensure_object(&content)?;
                self.records
                    .create_snapshot(&branch.id, &content, None, Some("submitted for indexing"))
                    .await?;
                content
            }
            None => {
                self.records
                    .latest_snapshot(&branch.id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::bad_request(format!(
                            "content is required: branch {} has no menu snapshot",
                            branch.id
                        ))
                    })?
                    .content
            }
        };

        self.records
            .set_chatbot_status(&chatbot.id, ChatbotStatus::Building)
            .await?;

        let namespace = namespace_for(&branch.restaurant_id, &branch.name);
        let done = self.queue.submit(IndexJob {
            chatbot_id: chatbot.id.clone(),
            restaurant_id: branch.restaurant_id.clone(),
            branch_id: branch.id.clone(),
            namespace: namespace.clone(),
            content,
            prune,
        })?;
        tracing::info!(chatbot_id = %chatbot.id, %namespace, prune, "index job queued");

        Ok(IndexSubmission {
            chatbot: Chatbot {
                status: ChatbotStatus::Building,
                ..chatbot
            },
            done,
        })
    }

    // ---- vectors ----

    pub async fn delete_vectors(&self, branch_id: &str, ids: &[String]) -> ServiceResult<usize> {
        let branch = self.branch(branch_id).await?;
        if ids.is_empty() {
            return Err(ServiceError::bad_request("ids must not be empty"));
        }
        let namespace = namespace_for(&branch.restaurant_id, &branch.name);
        let deleted = sync::delete_vectors(
            self.vectors.as_ref(),
            &namespace,
            ids,
            self.vector_batch_size,
        )
        .await
        .map_err(ServiceError::Provider)?;
        tracing::info!(%namespace, deleted, "vectors deleted");
        Ok(deleted)
    }

    // ---- query ----

    /// Answer a question from the branch knowledge base.
    ///
    /// With `require_session` the caller must supply a `session_id`;
    /// otherwise a missing one is replaced by a fresh session.
    pub async fn query(
        &self,
        branch_id: &str,
        req: QueryRequest,
        require_session: bool,
    ) -> ServiceResult<QueryResponse> {
        let question = required("question", &req.question)?;
        let branch = self.branch(branch_id).await?;
        let namespace = namespace_for(&branch.restaurant_id, &branch.name);

        let supplied_session = req
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if require_session && supplied_session.is_none() {
            return Err(ServiceError::bad_request("session_id must not be empty"));
        }
        let session_id = supplied_session
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let language = req
            .language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_LANGUAGE)
            .to_string();

        let history = match supplied_session {
            Some(session) => match self
                .history
                .recent_turns(session, self.retrieval.history_limit)
                .await
            {
                Ok(turns) => turns,
                Err(e) => {
                    tracing::warn!(session_id = session, error = %e, "failed to read chat history");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let query_vector = embed_query(self.embedder.as_ref(), question)
            .await
            .map_err(ServiceError::Provider)?;
        let retrieval = retrieve(
            self.vectors.as_ref(),
            &namespace,
            &query_vector,
            self.retrieval.top_k,
        )
        .await
        .map_err(ServiceError::Provider)?;

        let response = if retrieval.context.is_empty() {
            NO_INFORMATION_RESPONSE.to_string()
        } else {
            let prompt = compose_prompt(
                question,
                &retrieval.context,
                &history,
                Some(&language),
                self.retrieval.history_limit,
            );
            match self.generator.generate(&prompt).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(%namespace, error = %e, "generation failed; returning context");
                    fallback_response(&retrieval.context)
                }
            }
        };

        if let Err(e) = self
            .history
            .append_turn(&session_id, question, &response, Some(&language))
            .await
        {
            tracing::warn!(%session_id, error = %e, "failed to store chat turn");
        }

        let with_history = require_session || supplied_session.is_some();
        tracing::info!(
            %namespace,
            matches = retrieval.matches.len(),
            context = retrieval.context.len(),
            history = history.len(),
            "query answered"
        );

        Ok(QueryResponse {
            debug: QueryDebug {
                namespace,
                matches: retrieval.matches.len(),
                context_count: retrieval.context.len(),
                history_count: with_history.then_some(history.len()),
                language: with_history.then(|| language.clone()),
            },
            response,
            context: retrieval.context,
            session_id,
        })
    }

    // ---- lookups ----

    async fn restaurant(&self, id: &str) -> ServiceResult<Restaurant> {
        self.records
            .get_restaurant(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("restaurant {} not found", id)))
    }

    async fn branch(&self, id: &str) -> ServiceResult<Branch> {
        self.records
            .get_branch(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("branch {} not found", id)))
    }
}

fn required<'a>(field: &str, value: &'a str) -> ServiceResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::bad_request(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(trimmed)
}

fn ensure_object(content: &Value) -> ServiceResult<()> {
    if content.is_object() {
        Ok(())
    } else {
        Err(ServiceError::bad_request("content must be a JSON object"))
    }
}
