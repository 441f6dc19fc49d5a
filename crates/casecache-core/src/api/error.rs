use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// No response at all: offline, DNS, refused connection, timeout.
    #[error("Network error: {0}")]
    NetworkFailure(#[from] reqwest::Error),

    #[error("Remote service rejected the request with status {status}: {body}")]
    RemoteRejected { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
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
        ApiError::RemoteRejected {
            status: status.as_u16(),
            body: Self::truncate_body(body),
        }
    }

    /// Failures a cached copy may stand in for on the read path.
    pub fn allows_cache_fallback(&self) -> bool {
        matches!(
            self,
            ApiError::NetworkFailure(_) | ApiError::RemoteRejected { .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::RemoteRejected { status, .. } => Some(*status),
            ApiError::NetworkFailure(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
