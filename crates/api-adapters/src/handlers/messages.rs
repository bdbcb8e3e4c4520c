use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use domains::{AppError, ConversationId, Message, MessagePage, PageCursor};
use serde::Deserialize;
use services::SendMessage;

use crate::error::ApiError;
use crate::extract::AuthUser;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(alias = "pageSize")]
    pub limit: Option<usize>,
    pub before: Option<DateTime<Utc>>,
    pub before_seq: Option<i64>,
}

impl ListParams {
    fn cursor(&self) -> Result<Option<PageCursor>, AppError> {
        match (self.before, self.before_seq) {
            (Some(created_at), seq) => Ok(Some(PageCursor { created_at, seq })),
            (None, Some(_)) => Err(AppError::ValidationError("beforeSeq requires before".into())),
            (None, None) => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default, alias = "body")]
    pub text: Option<String>,
    #[serde(default, alias = "attachment")]
    pub attachment_ref: Option<String>,
}

/// GET /conversations/{id}/messages
pub async fn list(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<MessagePage>, ApiError> {
    let Query(params) = params.map_err(|e| AppError::ValidationError(e.body_text()))?;
    let cursor = params.cursor()?;
    let page = state
        .messages
        .list(&ConversationId::new(id), &user, params.limit, cursor)
        .await?;
    Ok(Json(page))
}

/// POST /conversations/{id}/messages
pub async fn send(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let Json(request) = body.map_err(|e| AppError::ValidationError(e.body_text()))?;
    let input = SendMessage {
        body: request.text,
        attachment: request.attachment_ref,
    };

    match state.messages.append(&ConversationId::new(id), &user, input).await {
        Ok(message) => {
            state.metrics.messages_sent.inc();
            Ok((StatusCode::CREATED, Json(message)))
        }
        Err(err) => {
            if matches!(err, AppError::RateLimitExceeded { .. }) {
                state.metrics.messages_rate_limited.inc();
            }
            Err(err.into())
        }
    }
}
