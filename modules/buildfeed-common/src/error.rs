use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
