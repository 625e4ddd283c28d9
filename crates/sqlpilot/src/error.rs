//! Client error taxonomy.
//!
//! | Variant         | Transport | Typical cause                              |
//! |-----------------|-----------|--------------------------------------------|
//! | `Http`          | yes       | connect refused, timeout, broken body      |
//! | `Status`        | yes       | backend answered non-2xx (with `detail`)   |
//! | `Decode`        | no        | response body was not the expected JSON    |
//! | `EmptySql`      | no        | `execute` called with blank SQL            |
//! | `Configuration` | no        | bad env var or flag                        |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status; `detail` is the backend's error message when it sent one.
    #[error("Backend returned {status}: {detail}")]
    Status {
        status: reqwest::StatusCode,
        detail: String,
    },

    #[error("Unexpected response body: {0}")]
    Decode(String),

    #[error("No SQL to execute")]
    EmptySql,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether the failure happened on the wire rather than in our input.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status { .. })
    }

    /// Build a `Status` error from a response body, preferring FastAPI's
    /// `{"detail": "..."}` shape over the raw text.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| match v.get("detail") {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
                None => None,
            })
            .unwrap_or_else(|| body.trim().to_string());
        Self::Status { status, detail }
    }
}
