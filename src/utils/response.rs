use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

/// Wire-level error body:
/// `{ "error": { "code", "message", "details" }, "timestamp" }`
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Application error carrying a stable code and the HTTP status it maps to.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.to_string(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_parameters(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_PARAMETERS", message)
    }

    pub fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: &str) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn insufficient_funds(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INSUFFICIENT_FUNDS", message)
    }

    pub fn insufficient_shares(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INSUFFICIENT_SHARES", message)
    }

    pub fn settlement_failed(message: &str) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SETTLEMENT_FAILED",
            message,
        )
    }

    pub fn rate_limited(message: &str) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
    }

    pub fn internal(message: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.code,
                message: self.message,
                details: self.details,
            },
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<crate::services::matching::ExchangeError> for ApiError {
    fn from(err: crate::services::matching::ExchangeError) -> Self {
        use crate::services::matching::ExchangeError as E;
        match &err {
            E::UnknownTicker(_) | E::OrderNotFound(_) | E::AccountNotFound(_) => {
                Self::not_found(&err.to_string())
            }
            E::InsufficientFunds { .. } => Self::insufficient_funds(&err.to_string()),
            E::InsufficientShares { .. } => Self::insufficient_shares(&err.to_string()),
            E::InvalidOrder(_) => Self::invalid_parameters(&err.to_string()),
            E::NotOwner => Self::forbidden("order belongs to a different account"),
            E::NotCancellable(_) | E::DuplicateTicker(_) => Self::conflict(&err.to_string()),
            E::SettlementFailed(_) => Self::settlement_failed(&err.to_string()),
            E::Store(_) | E::Corrupt(_) => {
                tracing::error!("store error surfaced to API: {}", err);
                Self::internal("internal error")
            }
        }
    }
}
