//! Chat handler

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use scripture_qa_common::{
    errors::{AppError, Result},
    metrics::RequestMetrics,
    ChatMessage,
};
use scripture_qa_context::{Conversation, PipelineOutcome};

/// Chat request; `query` or the last message supplies the question
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    /// A blank query defers to the last message
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub query: Option<String>,

    /// Conversation so far, latest turn last
    #[serde(default)]
    #[validate(length(max = 50))]
    pub messages: Vec<ChatMessage>,
}

/// Answer a question as an event stream, or as JSON when nothing matched
pub async fn chat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let metrics = RequestMetrics::start("POST", "/v2/chat");

    let response = match respond(&state, payload).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };

    metrics.finish(response.status().as_u16());
    response
}

async fn respond(
    state: &AppState,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(request) = payload.map_err(|e| AppError::InvalidFormat {
        message: e.body_text(),
    })?;

    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let conversation = Conversation::from_request(request.query.as_deref(), &request.messages)
        .map_err(|_| AppError::Validation {
            message: "No query provided".to_string(),
            field: Some("query".to_string()),
        })?;

    tracing::info!(
        question_chars = conversation.question.chars().count(),
        turns = conversation.turn_count(),
        "Chat request"
    );

    match state.pipeline.answer(&conversation).await? {
        PipelineOutcome::Empty(empty) => Ok(Json(empty).into_response()),
        PipelineOutcome::Stream(stream) => Response::builder()
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(stream))
            .map_err(|e| AppError::Internal {
                message: format!("Failed to build stream response: {}", e),
            }),
    }
}
