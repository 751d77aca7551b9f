use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the service clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced an HTTP response (DNS, connect, timeout, ...).
    #[error("Could not reach the service: {0}")]
    Transport(#[from] reqwest::Error),

    /// No usable session: nothing stored, the refresh failed, or the
    /// replayed request was rejected again.
    #[error("Not authenticated. Run 'docscan auth login' to sign in")]
    Unauthenticated,

    /// The backend answered with a non-success status.
    #[error("{message}")]
    Backend { status: StatusCode, message: String },

    /// A success response whose body does not match the endpoint's shape.
    #[error("Malformed response from {endpoint}: {reason}")]
    MalformedResponse {
        endpoint: &'static str,
        reason: String,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ApiError {
    /// Builds a [`ApiError::Backend`] from a failed response body, preferring
    /// the backend's own explanation over `fallback`.
    pub fn from_body(status: StatusCode, body: &str, fallback: &str) -> Self {
        let message = extract_detail(body).unwrap_or_else(|| fallback.to_string());
        ApiError::Backend { status, message }
    }

    #[cfg(test)]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Backend { status, .. } => Some(*status),
            ApiError::Unauthenticated => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, ApiError::Unauthenticated)
    }
}

/// Pulls a human readable message out of an error payload.
///
/// Understands `{"detail": "..."}`, FastAPI validation lists
/// (`{"detail": [{"msg": "..."}]}`) and `{"message": "..."}`.
pub fn extract_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;

    match value.get("detail") {
        Some(Value::String(detail)) if !detail.trim().is_empty() => {
            return Some(detail.clone());
        }
        Some(Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if !messages.is_empty() {
                return Some(messages.join("; "));
            }
        }
        _ => {}
    }

    value
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .map(str::to_string)
}
