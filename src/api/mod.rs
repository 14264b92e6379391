pub mod chat;
pub mod health;
pub mod research;

use axum::Router;
use axum::routing::{get, post};

use crate::AppState;

/// Build the full API router.
///
/// Route layout:
/// ```text
/// /health                                GET
/// /v1/tools/ask                          POST
/// /v1/tools/chat/completions             POST
/// /v1/tools/research                     POST
/// /v1/tools/research/{transaction_id}    GET
/// ```
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/v1/tools/ask", post(chat::ask))
        .route("/v1/tools/chat/completions", post(chat::chat_completions))
        .route("/v1/tools/research", post(research::create_deep_research))
        .route(
            "/v1/tools/research/{transaction_id}",
            get(research::get_deep_research_result),
        )
}
