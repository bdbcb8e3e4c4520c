use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use domains::{retry_after_secs, AppError};
use serde_json::json;

/// HTTP face of [`AppError`].
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

/// Stable machine-readable code, shared by REST bodies and push `error` frames.
pub fn error_code(err: &AppError) -> &'static str {
    match err {
        AppError::AuthRequired(_) => "AUTH_REQUIRED",
        AppError::AccessDenied(_) => "ACCESS_DENIED",
        AppError::NotFound(..) => "NOT_FOUND",
        AppError::ValidationError(_) => "INVALID_INPUT",
        AppError::SelfConversation => "SELF_CONVERSATION",
        AppError::NoOwner(_) => "NO_OWNER",
        AppError::RateLimitExceeded { .. } => "RATE_LIMITED",
        AppError::Conflict(_) => "CONFLICT",
        AppError::Internal(_) => "INTERNAL_ERROR",
    }
}

/// Message safe to show a client. Internal detail stays in the logs.
pub fn public_message(err: &AppError) -> String {
    match err {
        AppError::Internal(_) => "internal server error".to_string(),
        AppError::NoOwner(_) => "listing has no resolvable seller".to_string(),
        other => other.to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            AppError::AuthRequired(_) => StatusCode::UNAUTHORIZED,
            AppError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(..) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_) | AppError::SelfConversation => StatusCode::BAD_REQUEST,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NoOwner(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &err {
            AppError::Internal(detail) => tracing::error!(error = %detail, "request failed"),
            AppError::NoOwner(listing) => tracing::error!(listing_id = %listing, "listing without owner"),
            _ => {}
        }

        let code = error_code(&err);
        let message = public_message(&err);

        if let AppError::RateLimitExceeded { retry_after } = err {
            let secs = retry_after_secs(retry_after);
            let body = json!({ "error": message, "code": code, "retryAfterSecs": secs });
            let mut response = (status, Json(body)).into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
            return response;
        }

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        let cases = [
            (AppError::AuthRequired("x".into()), StatusCode::UNAUTHORIZED),
            (AppError::AccessDenied("x".into()), StatusCode::FORBIDDEN),
            (AppError::not_found("Conversation", "c1"), StatusCode::NOT_FOUND),
            (AppError::ValidationError("x".into()), StatusCode::BAD_REQUEST),
            (AppError::SelfConversation, StatusCode::BAD_REQUEST),
            (AppError::NoOwner("l1".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (AppError::Internal("db down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }

    #[test]
    fn throttled_response_carries_retry_after() {
        let response = ApiError(AppError::RateLimitExceeded {
            retry_after: Duration::from_millis(4200),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "5");
        assert_eq!(public_message(&AppError::RateLimitExceeded {
            retry_after: Duration::from_millis(4200),
        }), "too many requests, retry after 5s");
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        assert_eq!(
            public_message(&AppError::Internal("password=hunter2".into())),
            "internal server error"
        );
    }
}
