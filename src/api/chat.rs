use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::error::AppError;
use crate::meter::{AskParams, AskResult, ChatCompletionsResult};
use crate::upstream::types::ChatRequest;

/// POST /v1/tools/ask
///
/// Simple-prompt operation: a single user message, streamed upstream, with
/// the full authorize/settle bracket around the call.
pub async fn ask(
    State(state): State<AppState>,
    Json(params): Json<AskParams>,
) -> Result<Json<AskResult>, AppError> {
    tracing::info!(
        model = params.model.as_deref().unwrap_or("default"),
        query_chars = params.query.len(),
        "Ask request"
    );
    let result = state.meter.ask(params).await?;
    Ok(Json(result))
}

/// POST /v1/tools/chat/completions
///
/// Raw chat completion with a caller-supplied message list and parameter
/// set. Always invoked non-streamed upstream.
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatCompletionsResult>, AppError> {
    if request.messages.is_empty() {
        return Err(AppError::BadRequest("messages must not be empty".into()));
    }
    tracing::info!(
        model = %request.model,
        messages = request.messages.len(),
        "Chat completion request"
    );
    let result = state.meter.chat_completions(request).await?;
    Ok(Json(result))
}
