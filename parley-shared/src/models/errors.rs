use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body returned by REST endpoints alongside problem-details responses.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
pub struct ErrorResponse {
    /// The main error message.
    pub message: String,
    /// Optional additional details about the error.
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {}", self.message, details),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ErrorResponse {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_details_when_present() {
        assert_eq!(ErrorResponse::new("boom").to_string(), "boom");
        assert_eq!(
            ErrorResponse::with_details("boom", "disk full").to_string(),
            "boom: disk full"
        );
    }

    #[test]
    fn serialization_round_trips() {
        let error = ErrorResponse::with_details("bad request", "body too long");
        let json = serde_json::to_string(&error).unwrap();
        let back: ErrorResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, error);
    }
}
