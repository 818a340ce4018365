pub mod socket;
pub mod threads;
pub mod widget;

use crate::http::error::ApiError;

/// Validates an inbound message body: non-empty after trimming, bounded
/// length. Shared by the REST surface and the socket gateway.
pub(crate) fn validate_message_body(body: &str, max_chars: usize) -> Result<String, ApiError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("message body must not be empty"));
    }
    if trimmed.chars().count() > max_chars {
        return Err(ApiError::validation(format!(
            "message body exceeds {max_chars} characters"
        )));
    }
    Ok(trimmed.to_string())
}
