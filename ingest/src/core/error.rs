use thiserror::Error;

/// Errors surfaced by the ingestion core.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Request is missing a required field or carries an invalid one
    #[error("{0}")]
    BadRequest(String),

    /// Referenced feed or country does not exist
    #[error("{0}")]
    NotFound(String),

    /// Upstream answered with a non-2xx status
    #[error("HTTP {0}")]
    UpstreamStatus(u16),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A sibling service reported failure or returned an unusable payload
    #[error("{0}")]
    Collaborator(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
