use thiserror::Error;

/// Failure of a remote call, as seen by the cache layer.
///
/// `Clone` because a single failed fetch is stored in the cache entry and
/// handed to every de-duplicated waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server rejected request ({status}): {detail}")]
    ServerRejected { status: u16, detail: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        ApiError::ServerRejected {
            status: status.as_u16(),
            detail: Self::detail_from_body(body),
        }
    }

    /// FastAPI puts the human-readable reason under `detail`; fall back to the
    /// raw body when it is not JSON.
    fn detail_from_body(body: &str) -> String {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => match map.get("detail") {
                Some(serde_json::Value::String(s)) => Self::truncate_body(s),
                Some(other) => Self::truncate_body(&other.to_string()),
                None => Self::truncate_body(body),
            },
            _ => Self::truncate_body(body),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::ServerRejected { status: 404, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::ServerRejected { status: 409, .. })
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::InvalidResponse(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::InvalidResponse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_extracts_fastapi_detail() {
        let err = ApiError::from_status(
            reqwest::StatusCode::NOT_FOUND,
            r#"{"detail":"Trip not found"}"#,
        );
        assert_eq!(
            err,
            ApiError::ServerRejected {
                status: 404,
                detail: "Trip not found".to_string()
            }
        );
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_from_status_keeps_plain_body() {
        let err = ApiError::from_status(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(err.to_string(), "Server rejected request (502): upstream down");
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.ends_with(&format!("(truncated, {} total bytes)", long.len())));
    }
}
