use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use domains::{AppError, ConversationId, ConversationView, UnreadSummary};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::extract::AuthUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOrCreateRequest {
    pub listing_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOrCreateResponse {
    pub conversation_id: ConversationId,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: usize,
}

/// POST /conversations/find-or-create
pub async fn find_or_create(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Result<Json<FindOrCreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FindOrCreateResponse>), ApiError> {
    let Json(request) = body.map_err(|e| AppError::ValidationError(e.body_text()))?;
    let outcome = state.conversations.find_or_create(&request.listing_id, &user).await?;

    let status = if outcome.created {
        state.metrics.conversations_created.inc();
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(FindOrCreateResponse {
            conversation_id: outcome.conversation.id,
            created: outcome.created,
        }),
    ))
}

/// GET /conversations
pub async fn list(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<ConversationView>>, ApiError> {
    Ok(Json(state.conversations.list_for_user(&user).await?))
}

/// GET /conversations/unread
pub async fn unread(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<UnreadSummary>, ApiError> {
    Ok(Json(state.unread.summary(&user).await?))
}

/// GET /conversations/{id}
pub async fn show(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    Ok(Json(state.conversations.view(&ConversationId::new(id), &user).await?))
}

/// POST /conversations/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let marked = state.conversations.mark_read(&ConversationId::new(id), &user).await?;
    Ok(Json(MarkReadResponse { marked }))
}
