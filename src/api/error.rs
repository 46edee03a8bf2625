use thiserror::Error;

/// Errors produced at the HTTP boundary.
///
/// Every response is classified exactly once, by `from_status` or by the
/// transport mapping in the client; the rest of the crate matches on these
/// variants and never inspects raw status codes or bodies again. `Clone` is
/// required so a single refresh outcome can be delivered to every request
/// waiting on it.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("unauthorized - session is no longer valid")]
    Unauthorized,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("access denied: {0}")]
    Forbidden(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("rate limited - please wait before retrying")]
    RateLimited,

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("unexpected response ({status}): {message}")]
    Unexpected { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..MAX_ERROR_BODY_LENGTH],
                body.len()
            )
        }
    }

    /// Pull the server-provided `message` field out of a JSON error body.
    pub(crate) fn body_message(body: &str) -> Option<String> {
        #[derive(serde::Deserialize)]
        struct ErrorBody {
            message: String,
        }
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .map(|b| b.message)
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::body_message(body).unwrap_or_else(|| Self::truncate_body(body));
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::Forbidden(message),
            404 => ApiError::NotFound(message),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::Server {
                status: status.as_u16(),
                message,
            },
            _ => ApiError::Unexpected {
                status: status.as_u16(),
                message,
            },
        }
    }

    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        ApiError::Network(err.to_string())
    }
}
