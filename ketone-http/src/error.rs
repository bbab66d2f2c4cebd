use ketone_core::HttpFailure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}")]
    Status { status: u16, body: String },

    #[error("invalid JSON in {status} response: {source}")]
    Json {
        status: u16,
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no tokio runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

impl HttpError {
    /// The failure handed back to the store. Network errors carry no status.
    pub fn into_failure(self) -> HttpFailure {
        match self {
            HttpError::Status { status, body } | HttpError::Json { status, body, .. } => {
                HttpFailure {
                    status: Some(status),
                    body,
                }
            }
            other => HttpFailure {
                status: None,
                body: other.to_string(),
            },
        }
    }
}
