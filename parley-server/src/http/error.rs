use axum::{http::StatusCode, response::IntoResponse};
use http::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use serde_json::json;
use thiserror::Error;

use crate::services::thread_store::StoreError;

pub type AppResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_failed", message)
    }

    /// The store is unavailable or a write failed. The client decides
    /// whether to retry; the server never retries a send on its own.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "persistence_error",
            message,
        )
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The wire-level code, reused verbatim by socket error frames.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors render as RFC 7807 problem documents.
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let mut body = json!({
            "type": format!("https://parley.chat/problems/{}", self.code),
            "title": self.status.canonical_reason().unwrap_or("Error"),
            "status": self.status.as_u16(),
            "code": self.code,
            "message": self.message,
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }

        let mut response = (self.status, axum::Json(body)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Persistence(source) => Self::persistence(source.to_string()),
            StoreError::NotFound(message) => Self::not_found(message),
            StoreError::Validation(message) => Self::validation(message),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err
                .code()
                .unwrap_or_else(|| std::borrow::Cow::Borrowed("unknown"));
            let message = format!("database error {code}");
            return Self::persistence(message)
                .with_details(json!({ "sqlstate": code, "message": db_err.message() }));
        }

        Self::persistence(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal_server_error(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;
    use serde_json::Value;

    #[test]
    fn store_errors_map_to_matching_status_codes() {
        let not_found = ApiError::from(StoreError::NotFound("thread x".into()));
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);

        let validation = ApiError::from(StoreError::Validation("empty body".into()));
        assert_eq!(validation.status, StatusCode::BAD_REQUEST);

        let persistence = ApiError::from(StoreError::Persistence(sqlx::Error::PoolTimedOut));
        assert_eq!(persistence.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(persistence.code(), "persistence_error");
    }

    #[test]
    fn unauthorized_carries_the_right_code() {
        let error = ApiError::unauthorized("bad secret");
        assert_eq!(error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(error.code(), "unauthorized");
        assert_eq!(error.message(), "bad secret");
    }

    #[tokio::test]
    async fn into_response_serializes_problem_details() {
        let response = ApiError::not_found("missing thread")
            .with_details(json!({ "thread": "t1" }))
            .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );

        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("body to bytes");
        let json: Value =
            serde_json::from_slice(&bytes).expect("problem details deserializes to json");
        assert_eq!(json["code"], "not_found");
        assert_eq!(json["message"], "missing thread");
        assert_eq!(json["details"]["thread"], "t1");
    }
}
