//! Conversation lifecycle endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use codemend_common::{ConversationId, CoreError, RunMode};
use tracing::{error, info};

use crate::server::AppState;
use crate::types::{
    CancelResponse, ConversationView, CreateConversationRequest, CreateConversationResponse,
    ErrorResponse, HealthResponse, UserMessageRequest,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn map_error(error: CoreError) -> ApiError {
    let (status, code) = match &error {
        CoreError::ConversationNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        CoreError::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        CoreError::Config(_) => (StatusCode::BAD_REQUEST, "BAD_CONFIG"),
        CoreError::WorkingCopy(_) => (StatusCode::UNPROCESSABLE_ENTITY, "WORKING_COPY"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %error, "request failed");
    }
    (status, Json(ErrorResponse::new(error.to_string(), code)))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<CreateConversationResponse>), ApiError> {
    if request.requirement.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new(
                "requirement must not be empty",
                "MISSING_FIELD_REQUIREMENT",
            )),
        ));
    }
    if request.repo_url.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new(
                "repo_url must not be empty",
                "MISSING_FIELD_REPO_URL",
            )),
        ));
    }

    let mode = request.mode.unwrap_or(RunMode::Maintain);
    let workflow = state
        .supervisor
        .start(&request.requirement, &request.repo_url, mode, request.user_id)
        .await
        .map_err(map_error)?;

    info!(conversation_id = %workflow.conversation_id, "conversation created");
    Ok((
        StatusCode::CREATED,
        Json(CreateConversationResponse {
            conversation_id: workflow.conversation_id.to_string(),
        }),
    ))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    let conversation_id = ConversationId::from_string(id.clone());
    let workflow = state
        .supervisor
        .get(&conversation_id)
        .await
        .map_err(map_error)?
        .ok_or_else(|| map_error(CoreError::ConversationNotFound(id)))?;
    Ok(Json(ConversationView::from(workflow)))
}

pub async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UserMessageRequest>,
) -> Result<Json<ConversationView>, ApiError> {
    let conversation_id = ConversationId::from_string(id);
    let workflow = state
        .supervisor
        .resume(&conversation_id, &request.content)
        .await
        .map_err(map_error)?;
    Ok(Json(ConversationView::from(workflow)))
}

pub async fn cancel_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiError> {
    let conversation_id = ConversationId::from_string(id.clone());
    state
        .supervisor
        .cancel(&conversation_id)
        .await
        .map_err(map_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            conversation_id: id,
            status: "CANCELLED".to_string(),
        }),
    ))
}
