use axum::Json;
use axum::extract::{Path, State};

use crate::AppState;
use crate::error::AppError;
use crate::meter::{DeepResearchCreated, DeepResearchParams, DeepResearchStatus};

/// POST /v1/tools/research
///
/// Submit an asynchronous deep-research job. Authorizes the full five-clause
/// budget and defers settlement to the poll operation.
pub async fn create_deep_research(
    State(state): State<AppState>,
    Json(params): Json<DeepResearchParams>,
) -> Result<Json<DeepResearchCreated>, AppError> {
    if params.messages.is_empty() {
        return Err(AppError::BadRequest("messages must not be empty".into()));
    }
    tracing::info!(
        messages = params.messages.len(),
        effort = ?params.reasoning_effort,
        "Deep-research request"
    );
    let result = state.meter.deep_research(params).await?;
    Ok(Json(result))
}

/// GET /v1/tools/research/{transaction_id}
///
/// Poll a deep-research job by the transaction id returned at creation.
/// Settles the transaction the first time a terminal state is observed.
pub async fn get_deep_research_result(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<DeepResearchStatus>, AppError> {
    tracing::info!(transaction_id = %transaction_id, "Deep-research poll");
    let result = state.meter.deep_research_result(&transaction_id).await?;
    Ok(Json(result))
}
