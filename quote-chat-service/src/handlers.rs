use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use quote_flow::{FinalizationRecord, FlowError, InputSignal, Message, SessionSnapshot, Stage};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::AppState;

/// Engine errors as HTTP responses.
pub struct ApiError(FlowError);

impl From<FlowError> for ApiError {
    fn from(e: FlowError) -> Self {
        Self(e)
    }
}

pub fn status_for(error: &FlowError) -> StatusCode {
    match error {
        FlowError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        FlowError::InputDisabled(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            warn!(error = %self.0, status = %status, "Request refused");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub session_id: String,
    pub accepted: bool,
    pub from: Stage,
    pub to: Stage,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub generation: u64,
    pub stage: Stage,
    pub input: InputSignal,
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn start_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let session = state.runner.start().await?;
    info!(session_id = %session.id(), "Session created");
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id: session.id().to_string(),
            generation: session.generation(),
            stage: session.stage(),
            input: state.runner.snapshot(session.id()).await?.input,
        }),
    ))
}

pub async fn submit(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    info!(
        session_id = %session_id,
        content_length = %request.content.len(),
        "Processing submit request"
    );

    let transition = state.runner.submit(&session_id, &request.content).await?;

    info!(
        session_id = %session_id,
        accepted = transition.accepted,
        to = %transition.to,
        "Submit handled"
    );
    Ok(Json(SubmitResponse {
        session_id,
        accepted: transition.accepted,
        from: transition.from,
        to: transition.to,
    }))
}

pub async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.runner.reset(&session_id).await?;
    Ok(Json(SessionResponse {
        session_id,
        generation: session.generation(),
        stage: session.stage(),
        input: state.runner.snapshot(session.id()).await?.input,
    }))
}

pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.runner.end(&session_id).await?;
    info!(session_id = %session_id, "Session ended");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.runner.snapshot(&session_id).await?))
}

/// Delivered messages only; anything still queued shows up on a later poll.
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    // 404 for unknown ids rather than an empty list
    state.runner.snapshot(&session_id).await?;
    Ok(Json(state.runner.transcript(&session_id)))
}

pub async fn list_leads(
    State(state): State<AppState>,
) -> Result<Json<Vec<FinalizationRecord>>, ApiError> {
    Ok(Json(state.runner.leads().await?))
}
