//! HTTP surface: the `/chat` query service plus health and status endpoints.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{debug, error};

use crate::embedder::Embedder;
use crate::error::ChatError;
use crate::state::IndexHandle;

/// Answer returned when nothing matches or the index is not ready.
pub const FALLBACK_ANSWER: &str = "I could not find the answer in the provided document.";

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    index: IndexHandle,
    embedder: Arc<dyn Embedder>,
}

impl AppState {
    /// Builds request state around the shared index handle and the indexing embedder.
    pub fn new(index: IndexHandle, embedder: Arc<dyn Embedder>) -> Self {
        Self { index, embedder }
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    question: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    answer: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    state: &'static str,
}

/// Routes without cross-origin handling.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status_handler))
        .route("/chat", post(chat_handler))
        .with_state(state)
}

/// Routes restricted to browser calls from `allowed_origin`.
pub fn router_with_cors(state: AppState, allowed_origin: &str) -> anyhow::Result<Router> {
    Ok(router(state).layer(cors_layer(allowed_origin)?))
}

/// GET and POST from one origin, with only `Content-Type` allowed as a request header.
pub fn cors_layer(allowed_origin: &str) -> anyhow::Result<CorsLayer> {
    let origin = HeaderValue::from_str(allowed_origin.trim())
        .with_context(|| format!("invalid allowed origin {allowed_origin}"))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: state.index.snapshot().await.label(),
    })
}

async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ChatError> {
    let question = match payload {
        Ok(Json(request)) => request.question,
        Err(rejection) => {
            debug!("rejected chat body: {}", rejection);
            None
        }
    };
    let question = question
        .filter(|q| !q.is_empty())
        .ok_or(ChatError::Validation)?;
    let answer = answer_question(&state.index, state.embedder.as_ref(), &question)
        .await
        .inspect_err(|err| error!("chat request failed: {:#}", err))?;
    Ok(Json(ChatResponse { answer }))
}

/// Embeds `question` and returns the text of the single closest stored chunk.
///
/// A store that is not `Ready`, or a search with no hits, yields [`FALLBACK_ANSWER`].
pub async fn answer_question(
    index: &IndexHandle,
    embedder: &dyn Embedder,
    question: &str,
) -> Result<String, ChatError> {
    let Some(store) = index.ready_store().await else {
        debug!("index not ready; answering with fallback");
        return Ok(FALLBACK_ANSWER.to_string());
    };
    let vector = embedder
        .embed(question)
        .await
        .context("failed to embed question")?;
    let hits = store
        .query(&vector, 1)
        .await
        .context("similarity search failed")?;
    Ok(hits
        .into_iter()
        .next()
        .map(|hit| hit.text)
        .unwrap_or_else(|| FALLBACK_ANSWER.to_string()))
}
