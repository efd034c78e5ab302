use axum::Json;
use axum::extract::State;
use documind_agent::AGENT_ERROR_MESSAGE;
use documind_core::{AuditRequest, AuditResponse};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::ApiError;
use crate::state::AppState;

/// Shorter inputs are rejected before the agent runs.
pub const MIN_TEXT_CHARS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootResponse {
    pub status: String,
    pub message: String,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        status: "Online".into(),
        message: "DocuMind API is running.".into(),
    })
}

pub async fn audit(
    State(state): State<AppState>,
    Json(request): Json<AuditRequest>,
) -> Result<Json<AuditResponse>, ApiError> {
    let agent = state.agent().ok_or(ApiError::NotLoaded)?;
    if request.text.chars().count() < MIN_TEXT_CHARS {
        return Err(ApiError::TextTooShort);
    }

    info!(chars = request.text.chars().count(), "received audit request");
    let text = request.text;
    let run = tokio::spawn(async move { agent.run_detailed(&text).await })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let response = match run {
        Ok(run) => AuditResponse::new(run.classification().map(str::to_string), run.output),
        Err(e) => {
            error!(error = %e, "agent failed");
            AuditResponse::new(None, AGENT_ERROR_MESSAGE.to_string())
        }
    };
    Ok(Json(response))
}
