use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-2xx status and an error body.
    #[error("{status}: {message}")]
    Api {
        status: StatusCode,
        message: String,
        details: Option<String>,
    },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not signed in")]
    NotSignedIn,
}

impl ClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status(),
            Self::NotSignedIn => None,
        }
    }
}
