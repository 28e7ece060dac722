use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use mymate_shared::protocol::AuthFailureKind;
use mymate_store::StoreError;

use crate::auth::AuthError;
use crate::history::HistoryError;
use crate::store::StoreUnavailable;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{}", .0.message())]
    Unauthorized(AuthFailureKind),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn retryable(&self) -> bool {
        match self {
            ServerError::Unauthorized(kind) => *kind == AuthFailureKind::Unavailable,
            ServerError::StoreUnavailable(_) => true,
            ServerError::BadRequest(_)
            | ServerError::Forbidden(_)
            | ServerError::NotFound(_)
            | ServerError::Internal(_) => false,
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(e: AuthError) -> Self {
        ServerError::Unauthorized(e.kind())
    }
}

impl From<StoreUnavailable> for ServerError {
    fn from(e: StoreUnavailable) -> Self {
        match e {
            StoreUnavailable::Store(StoreError::NotFound) => {
                ServerError::NotFound("no such user".into())
            }
            other => ServerError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<HistoryError> for ServerError {
    fn from(e: HistoryError) -> Self {
        match e {
            HistoryError::StoreUnavailable(e) => ServerError::StoreUnavailable(e.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthorized(kind) => (
                StatusCode::from_u16(kind.status()).unwrap_or(StatusCode::UNAUTHORIZED),
                self.to_string(),
            ),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::StoreUnavailable(detail) => {
                tracing::warn!(error = %detail, "Store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable".to_string())
            }
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
            "retryable": self.retryable(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ServerError::Unauthorized(AuthFailureKind::Expired), 401),
            (ServerError::Unauthorized(AuthFailureKind::Unavailable), 503),
            (ServerError::BadRequest("limit".into()), 400),
            (ServerError::Forbidden("admin".into()), 403),
            (ServerError::NotFound("user".into()), 404),
            (ServerError::StoreUnavailable("down".into()), 503),
            (ServerError::Internal("boom".into()), 500),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status().as_u16(), status);
        }
    }

    #[test]
    fn test_retryable() {
        assert!(ServerError::StoreUnavailable("down".into()).retryable());
        assert!(!ServerError::Unauthorized(AuthFailureKind::Revoked).retryable());
        assert!(!ServerError::BadRequest("x".into()).retryable());
    }
}
