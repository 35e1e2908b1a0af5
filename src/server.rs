//! HTTP shell around the retrieval pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Retrieval-augmented query |
//! | `POST` | `/reindex` | Schedule a background rebuild |
//! | `GET`  | `/chats` | List chat sessions, most recent first |
//! | `POST` | `/chats` | Create a chat session |
//! | `GET`  | `/chats/{id}` | Fetch a session |
//! | `PUT`  | `/chats/{id}` | Save a session |
//! | `DELETE` | `/chats/{id}` | Delete a session |
//! | `GET`  | `/chats/summary/{id}` | Brief session summary |
//! | `GET`  | `/sources` | List extractable documents |
//! | `GET`  | `/health` | Liveness check |
//!
//! Every endpoint except `/health` honors the optional shared-secret
//! `Authorization: Bearer <token>` check. Errors are JSON bodies of the
//! form `{ "error": { "code": "...", "message": "..." } }`.

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::chats::ChatStore;
use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::extract;
use crate::generate::{self, GenerateOptions};
use crate::index::IndexHolder;
use crate::models::{
    ChatCreate, ChatSession, ChatSummary, Diagnostics, QueryRequest, QueryResponse, QuerySource,
};
use crate::prompt;
use crate::retrieve;

/// Shared application state handed to every route handler.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    index: Arc<IndexHolder>,
    embedder: Arc<dyn Embedder>,
    chats: Arc<ChatStore>,
}

/// Start the HTTP service.
///
/// The vector store is loaded (or built) before serving; a startup failure
/// is logged rather than fatal, since the first query retries the build.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let embedder = embedding::create_embedder(&config.embedding)?;
    let chats = Arc::new(ChatStore::new(config.paths.chats_dir.clone()));
    let index = Arc::new(IndexHolder::new());

    match index.load_or_build(&config, &embedder).await {
        Ok(_) => tracing::info!("vector store loaded"),
        Err(e) => tracing::warn!("failed to load or build vector store at startup: {e:#}"),
    }

    let origins: Vec<HeaderValue> = config
        .server
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    let bind = config.server.bind.clone();
    let state = AppState {
        config,
        index,
        embedder,
        chats,
    };

    let app = Router::new()
        .route("/query", post(handle_query))
        .route("/reindex", post(handle_reindex))
        .route("/chats", get(handle_list_chats).post(handle_create_chat))
        .route("/chats/summary/{id}", get(handle_chat_summary))
        .route(
            "/chats/{id}",
            get(handle_get_chat)
                .put(handle_update_chat)
                .delete(handle_delete_chat),
        )
        .route("/sources", get(handle_sources))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!("listening on http://{}", bind);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
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

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: "Unauthorized".to_string(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: code.to_string(),
        message: message.into(),
    }
}

fn require_token(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    if let Some(token) = &state.config.server.api_token {
        let expected = format!("Bearer {token}");
        let provided = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            return Err(unauthorized());
        }
    }
    Ok(())
}

// ============ POST /query ============

async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    require_token(&state, &headers)?;

    let k = req.k.unwrap_or(state.config.retrieval.default_k);
    if k == 0 {
        return Err(bad_request("k must be >= 1"));
    }

    let mut sources: Vec<QuerySource> = Vec::new();
    let mut context_pieces: Vec<String> = Vec::new();
    let mut retrieved = Vec::new();
    let mut diagnostics = Diagnostics::default();

    if req.use_rag {
        let handle = state
            .index
            .ensure_up_to_date(&state.config, &state.embedder)
            .await
            .map_err(|e| internal("index_unavailable", format!("{e:#}")))?;

        let (chunks, diag) =
            retrieve::retrieve(&handle, &state.config.paths.data_dir, &req.query, k)
                .await
                .map_err(|e| internal("retrieval_failed", format!("{e:#}")))?;

        for chunk in &chunks {
            sources.push(QuerySource {
                source: chunk.source.clone(),
                snippet: prompt::snippet(&chunk.content),
            });
            context_pieces.push(format!("Source: {}\n{}", chunk.source, chunk.content));
        }
        retrieved = chunks;
        diagnostics = diag;
    }

    let history_block = req
        .history
        .as_deref()
        .map(prompt::history_block)
        .unwrap_or_default();

    let reference_sessions: Vec<ChatSession> = req
        .reference_chats
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .filter_map(|id| state.chats.get(id).ok().flatten())
        .collect();
    let reference_block = prompt::reference_block(&reference_sessions);

    let prompt_text = if req.use_rag {
        let summary = prompt::sources_summary(&diagnostics, &retrieved);
        prompt::rag_prompt(
            &req.query,
            &context_pieces,
            &summary,
            &reference_block,
            &history_block,
        )
    } else {
        prompt::plain_prompt(&req.query, &reference_block, &history_block)
    };

    let options = llm_options(&req);
    let answer = generate::generate(&state.config.generation, &prompt_text, &options)
        .await
        .map_err(|e| internal("generation_failed", e.to_string()))?;

    Ok(Json(QueryResponse { answer, sources }))
}

/// Forward only the generation parameters the caller actually set.
fn llm_options(req: &QueryRequest) -> GenerateOptions {
    GenerateOptions {
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        repeat_penalty: req.repeat_penalty,
        seed: req.seed,
        num_predict: req.max_tokens,
        num_ctx: req.num_ctx,
        mirostat: req.mirostat,
        mirostat_tau: req.mirostat_tau,
        mirostat_eta: req.mirostat_eta,
        stop: req.stop.clone(),
    }
}

// ============ POST /reindex ============

async fn handle_reindex(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    require_token(&state, &headers)?;

    let index = state.index.clone();
    let config = state.config.clone();
    let embedder = state.embedder.clone();
    // Fire and forget: the rebuild gate inside IndexHolder keeps this from
    // racing an inline per-query rebuild.
    tokio::spawn(async move {
        match index.rebuild(&config, &embedder).await {
            Ok(_) => tracing::info!("background reindex complete"),
            Err(e) => tracing::error!("background reindex failed: {e:#}"),
        }
    });

    Ok(Json(serde_json::json!({ "status": "reindex_started" })))
}

// ============ Chats ============

async fn handle_list_chats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatSession>>, AppError> {
    require_token(&state, &headers)?;
    let chats = state
        .chats
        .list()
        .map_err(|e| internal("chats_failed", format!("{e:#}")))?;
    Ok(Json(chats))
}

async fn handle_create_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<ChatCreate>>,
) -> Result<Json<ChatSession>, AppError> {
    require_token(&state, &headers)?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let session = state
        .chats
        .create(payload)
        .map_err(|e| internal("chats_failed", format!("{e:#}")))?;
    tracing::info!("created chat {}", session.id);
    Ok(Json(session))
}

async fn handle_get_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ChatSession>, AppError> {
    require_token(&state, &headers)?;
    state
        .chats
        .get(&id)
        .map_err(|e| internal("chats_failed", format!("{e:#}")))?
        .map(Json)
        .ok_or_else(|| not_found("Chat not found"))
}

async fn handle_update_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(mut session): Json<ChatSession>,
) -> Result<Json<ChatSession>, AppError> {
    require_token(&state, &headers)?;
    session.id = id;
    let saved = state
        .chats
        .save(session)
        .map_err(|e| internal("chats_failed", format!("{e:#}")))?;
    Ok(Json(saved))
}

async fn handle_delete_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_token(&state, &headers)?;
    let deleted = state
        .chats
        .delete(&id)
        .map_err(|e| internal("chats_failed", format!("{e:#}")))?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn handle_chat_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ChatSummary>, AppError> {
    require_token(&state, &headers)?;
    state
        .chats
        .summary(&id)
        .map_err(|e| internal("chats_failed", format!("{e:#}")))?
        .map(Json)
        .ok_or_else(|| not_found("Chat not found"))
}

// ============ GET /sources ============

async fn handle_sources(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, AppError> {
    require_token(&state, &headers)?;
    let docs = extract::load_documents(&state.config.paths.data_dir)
        .map_err(|e| internal("extraction_failed", format!("{e:#}")))?;
    Ok(Json(docs.into_iter().map(|d| d.source).collect()))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    msg: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    match state.index.current().await {
        Some(_) => Json(HealthResponse {
            ok: true,
            msg: "ok".to_string(),
        }),
        None => Json(HealthResponse {
            ok: false,
            msg: "vector_store_not_loaded".to_string(),
        }),
    }
}
