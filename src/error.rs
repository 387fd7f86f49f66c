//! Error kinds for startup indexing and per-request query handling.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::loader::LoadError;

/// Body returned for a missing or empty question.
pub const NO_QUESTION_MESSAGE: &str = "No question provided";
/// Body returned for any internal failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "Something went wrong";

/// Fatal failures of the startup indexing run.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The document could not be read or parsed.
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// An embedding call failed; the run stops at the first one.
    #[error("embedding error for chunk {chunk}: {source:#}")]
    Embedding {
        /// Identifier of the chunk being embedded.
        chunk: String,
        /// Collaborator error.
        source: anyhow::Error,
    },

    /// The store rejected the batch.
    #[error("store write error: {0:#}")]
    StoreWrite(anyhow::Error),

    /// The store could not report whether it already holds records.
    #[error("store read error: {0:#}")]
    StoreRead(anyhow::Error),
}

/// Failures surfaced by the `/chat` endpoint.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The request had no usable question.
    #[error("no question provided")]
    Validation,

    /// Embedding or store call failed while answering.
    #[error("query failed: {0:#}")]
    Query(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ChatError::Validation => (StatusCode::BAD_REQUEST, NO_QUESTION_MESSAGE),
            ChatError::Query(_) => (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_errors_hide_detail() {
        let response = ChatError::Query(anyhow::anyhow!("pinecone exploded")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn embedding_error_names_chunk() {
        let err = IndexError::Embedding {
            chunk: "doc-p1-c0".to_string(),
            source: anyhow::anyhow!("quota exceeded"),
        };
        assert_eq!(
            err.to_string(),
            "embedding error for chunk doc-p1-c0: quota exceeded"
        );
    }
}
