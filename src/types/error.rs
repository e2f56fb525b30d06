//! Error types for roadwise
//!
//! Every handler error funnels into `AppError`, which knows its HTTP status
//! and renders the JSON error body returned to clients.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::error;

/// Main error type for roadwise operations
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed")]
    Validation(BTreeMap<String, Vec<String>>),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests, retry in {retry_after_secs}s")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Database not available")]
    DatabaseUnavailable,

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a BTreeMap<String, Vec<String>>>,
}

impl AppError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DatabaseUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Mail(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::TooManyRequests { .. } => "RATE_LIMITED",
            Self::Database(_) => "DB_ERROR",
            Self::DatabaseUnavailable => "DB_UNAVAILABLE",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::Mail(_) => "MAIL_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to clients. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::Database(_) => "Database error".to_string(),
            Self::Internal(_) | Self::Config(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Render the error as a JSON response
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = self.status_code();

        if status.is_server_error() {
            error!(code = self.code(), "{}", self);
            sentry::capture_message(&self.to_string(), sentry::Level::Error);
        }

        let fields = match &self {
            Self::Validation(fields) => Some(fields),
            _ => None,
        };
        let body = ErrorBody {
            error: self.public_message(),
            code: self.code(),
            fields,
        };
        let json = serde_json::to_string(&body)
            .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        let mut builder = Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*");
        if let Self::TooManyRequests { retry_after_secs } = self {
            builder = builder.header("Retry-After", retry_after_secs.to_string());
        }

        builder
            .body(Full::new(Bytes::from(json)))
            .unwrap()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("Invalid JSON: {}", err))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::oid::Error> for AppError {
    fn from(_: bson::oid::Error) -> Self {
        Self::BadRequest("Invalid id".to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Gateway(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = BTreeMap::new();
        for (field, errs) in errors.field_errors() {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            fields.insert(field.to_string(), messages);
        }
        Self::Validation(fields)
    }
}

impl From<lettre::error::Error> for AppError {
    fn from(err: lettre::error::Error) -> Self {
        Self::Mail(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for AppError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        Self::Mail(err.to_string())
    }
}

impl From<lettre::address::AddressError> for AppError {
    fn from(err: lettre::address::AddressError) -> Self {
        Self::Mail(format!("Invalid address: {}", err))
    }
}

/// Result type alias for roadwise operations
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Sample {
        #[validate(email(message = "must be a valid email"))]
        email: String,
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Unauthorized("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::TooManyRequests { retry_after_secs: 5 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(AppError::DatabaseUnavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_validation_errors_are_collected_by_field() {
        let sample = Sample { email: "not-an-email".into() };
        let err: AppError = sample.validate().unwrap_err().into();
        match err {
            AppError::Validation(fields) => {
                assert_eq!(fields["email"], vec!["must be a valid email".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_database_details_hidden_from_clients() {
        let resp = AppError::Database("connection string leaked".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let resp = AppError::TooManyRequests { retry_after_secs: 42 }.into_response();
        assert_eq!(resp.headers()["Retry-After"], "42");
    }
}
