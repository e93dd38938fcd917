//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/restaurants` | Create a restaurant |
//! | `GET`  | `/restaurants/{restaurant_id}/branches` | Branches of a restaurant |
//! | `POST` | `/branches` | Create a branch |
//! | `GET`  | `/branches` | All branches |
//! | `POST` | `/branches/{branch_id}/snapshots` | Append a menu snapshot |
//! | `GET`  | `/branches/{branch_id}/snapshots` | Snapshots, newest first |
//! | `POST` | `/chatbots` | Create or rebuild a branch chatbot (202) |
//! | `GET`  | `/chatbots/{chatbot_id}` | Chatbot status |
//! | `POST` | `/chatbots/{chatbot_id}/reindex` | Reindex (202) |
//! | `POST` | `/branches/{branch_id}/vectors/delete` | Delete vectors by ID |
//! | `POST` | `/branches/{branch_id}/query` | Ask a question |
//! | `POST` | `/branches/{branch_id}/query-with-history` | Ask within a session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `provider_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the owner dashboard
//! and embedded chat widgets can call the API from any site.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

use crate::config::Config;
use crate::error::ServiceError;
use crate::models::{Branch, Chatbot, ChatbotStatus, MenuSnapshot, Restaurant};
use crate::service::{
    CreateChatbot, IndexSubmission, NewBranch, NewRestaurant, NewSnapshot, QueryRequest,
    QueryResponse, ReindexRequest, Service,
};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    service: Arc<Service>,
}

/// Build the service from configuration and serve until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(Service::from_config(config).await?);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("MindMenu API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(service)).await?;
    Ok(())
}

/// The full route table over an existing service.
pub fn router(service: Arc<Service>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/restaurants", post(handle_create_restaurant))
        .route(
            "/restaurants/{restaurant_id}/branches",
            get(handle_restaurant_branches),
        )
        .route(
            "/branches",
            post(handle_create_branch).get(handle_list_branches),
        )
        .route(
            "/branches/{branch_id}/snapshots",
            post(handle_add_snapshot).get(handle_list_snapshots),
        )
        .route(
            "/branches/{branch_id}/vectors/delete",
            post(handle_delete_vectors),
        )
        .route("/branches/{branch_id}/query", post(handle_query))
        .route(
            "/branches/{branch_id}/query-with-history",
            post(handle_query_with_history),
        )
        .route("/chatbots", post(handle_create_chatbot))
        .route("/chatbots/{chatbot_id}", get(handle_get_chatbot))
        .route("/chatbots/{chatbot_id}/reindex", post(handle_reindex))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .layer(cors)
        .with_state(AppState { service })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Provider(e) => {
                tracing::error!(error = %format!("{:#}", e), "provider call failed");
                StatusCode::BAD_GATEWAY
            }
            ServiceError::Internal(e) => {
                tracing::error!(error = %format!("{:#}", e), "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(format!("invalid request body: {}", rejection.body_text()))
    }
}

type ApiResult<T> = Result<T, AppError>;

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Restaurants & branches ============

#[derive(Serialize)]
struct BranchList {
    count: usize,
    branches: Vec<Branch>,
}

impl From<Vec<Branch>> for BranchList {
    fn from(branches: Vec<Branch>) -> Self {
        Self {
            count: branches.len(),
            branches,
        }
    }
}

async fn handle_create_restaurant(
    State(state): State<AppState>,
    body: Result<Json<NewRestaurant>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Restaurant>)> {
    let Json(req) = body?;
    let restaurant = state.service.create_restaurant(req).await?;
    Ok((StatusCode::CREATED, Json(restaurant)))
}

async fn handle_restaurant_branches(
    State(state): State<AppState>,
    Path(restaurant_id): Path<String>,
) -> ApiResult<Json<BranchList>> {
    let branches = state.service.list_branches(Some(&restaurant_id)).await?;
    Ok(Json(branches.into()))
}

async fn handle_create_branch(
    State(state): State<AppState>,
    body: Result<Json<NewBranch>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Branch>)> {
    let Json(req) = body?;
    let branch = state.service.create_branch(req).await?;
    Ok((StatusCode::CREATED, Json(branch)))
}

async fn handle_list_branches(State(state): State<AppState>) -> ApiResult<Json<BranchList>> {
    let branches = state.service.list_branches(None).await?;
    Ok(Json(branches.into()))
}

// ============ Snapshots ============

#[derive(Serialize)]
struct SnapshotList {
    count: usize,
    snapshots: Vec<MenuSnapshot>,
}

async fn handle_add_snapshot(
    State(state): State<AppState>,
    Path(branch_id): Path<String>,
    body: Result<Json<NewSnapshot>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MenuSnapshot>)> {
    let Json(req) = body?;
    let snapshot = state.service.add_snapshot(&branch_id, req).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn handle_list_snapshots(
    State(state): State<AppState>,
    Path(branch_id): Path<String>,
) -> ApiResult<Json<SnapshotList>> {
    let snapshots = state.service.list_snapshots(&branch_id).await?;
    Ok(Json(SnapshotList {
        count: snapshots.len(),
        snapshots,
    }))
}

// ============ Chatbots ============

#[derive(Serialize)]
struct IndexAccepted {
    chatbot_id: String,
    branch_id: String,
    status: ChatbotStatus,
    message: String,
}

impl From<IndexSubmission> for IndexAccepted {
    fn from(submission: IndexSubmission) -> Self {
        // The HTTP caller polls GET /chatbots/{id}; the completion channel
        // is dropped here and the job keeps running.
        let chatbot = submission.chatbot;
        Self {
            chatbot_id: chatbot.id,
            branch_id: chatbot.branch_id,
            status: chatbot.status,
            message: "indexing started".to_string(),
        }
    }
}

async fn handle_create_chatbot(
    State(state): State<AppState>,
    body: Result<Json<CreateChatbot>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<IndexAccepted>)> {
    let Json(req) = body?;
    let submission = state.service.create_chatbot(req).await?;
    Ok((StatusCode::ACCEPTED, Json(submission.into())))
}

async fn handle_get_chatbot(
    State(state): State<AppState>,
    Path(chatbot_id): Path<String>,
) -> ApiResult<Json<Chatbot>> {
    Ok(Json(state.service.get_chatbot(&chatbot_id).await?))
}

/// The body is optional: an empty POST reindexes the latest snapshot.
async fn handle_reindex(
    State(state): State<AppState>,
    Path(chatbot_id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<IndexAccepted>)> {
    let req: ReindexRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ReindexRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| bad_request(format!("invalid request body: {}", e)))?
    };
    let submission = state.service.reindex(&chatbot_id, req).await?;
    Ok((StatusCode::ACCEPTED, Json(submission.into())))
}

// ============ Vectors ============

#[derive(Deserialize)]
struct DeleteVectorsRequest {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Serialize)]
struct DeleteVectorsResponse {
    deleted: usize,
}

async fn handle_delete_vectors(
    State(state): State<AppState>,
    Path(branch_id): Path<String>,
    body: Result<Json<DeleteVectorsRequest>, JsonRejection>,
) -> ApiResult<Json<DeleteVectorsResponse>> {
    let Json(req) = body?;
    let deleted = state.service.delete_vectors(&branch_id, &req.ids).await?;
    Ok(Json(DeleteVectorsResponse { deleted }))
}

// ============ Query ============

async fn handle_query(
    State(state): State<AppState>,
    Path(branch_id): Path<String>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Json<QueryResponse>> {
    let Json(req) = body?;
    Ok(Json(state.service.query(&branch_id, req, false).await?))
}

async fn handle_query_with_history(
    State(state): State<AppState>,
    Path(branch_id): Path<String>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Json<QueryResponse>> {
    let Json(req) = body?;
    Ok(Json(state.service.query(&branch_id, req, true).await?))
}
