use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use beatstore_auth::{SigningError, WebhookError};
use beatstore_engine::{FulfillmentError, RedeemError, UpstreamError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Link expired")]
    LinkExpired,

    #[error("Download limit reached")]
    LinkExhausted,

    #[error("Payments are not configured")]
    PaymentsNotConfigured,

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", self.to_string()),
            ApiError::InvalidSignature(_) => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::LinkExpired => (StatusCode::GONE, "LINK_EXPIRED", self.to_string()),
            ApiError::LinkExhausted => (StatusCode::TOO_MANY_REQUESTS, "DOWNLOAD_LIMIT_REACHED", self.to_string()),
            ApiError::PaymentsNotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PAYMENTS_NOT_CONFIGURED",
                "Payments are not configured. Set a real Stripe secret key and restart the server.".to_string(),
            ),
            ApiError::Upstream(_) => {
                tracing::error!("Upstream error: {}", self);
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", "Upstream service unavailable".to_string())
            }
            ApiError::Internal(_) | ApiError::Database(_) => {
                tracing::error!("Internal error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "code": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<RedeemError> for ApiError {
    fn from(err: RedeemError) -> Self {
        match err {
            RedeemError::NotFound => ApiError::NotFound("Download link".to_string()),
            RedeemError::Expired => ApiError::LinkExpired,
            RedeemError::Exhausted => ApiError::LinkExhausted,
            RedeemError::Signing(e) => ApiError::Internal(e.into()),
            RedeemError::Storage(e) => ApiError::Internal(e),
        }
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        match err {
            FulfillmentError::MissingField(field) => {
                ApiError::Validation(format!("missing session field {}", field))
            }
            FulfillmentError::BeatNotFound(_) => ApiError::NotFound("Beat".to_string()),
            FulfillmentError::Email(e) => ApiError::Upstream(e.to_string()),
            FulfillmentError::Storage(e) => ApiError::Internal(e),
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError::InvalidSignature(err.to_string())
    }
}

impl From<SigningError> for ApiError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::InvalidRequest(message) => ApiError::Validation(message),
            other => ApiError::Internal(other.into()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
