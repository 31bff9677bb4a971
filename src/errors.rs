use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Errors that stop a run before or after the rows are processed.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Config(String),
    #[error("failed to write output: {0}")]
    OutputWrite(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Why a single row was not geocoded. Recorded on the row's outcome; never aborts a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("{0}")]
    Transport(String),
    #[error("HTTP Status {0}")]
    HttpStatus(u16),
    #[error("Parsing error: {0}")]
    Parse(String),
    #[error("{0}")]
    Provider(String),
    #[error("Invalid return value from handler for response body: {body}")]
    InvalidHandlerReturn { body: String },
}

impl RowError {
    /// True when the upstream service answered with a 200 body before the row failed.
    pub fn after_response(&self) -> bool {
        !matches!(self, RowError::Transport(_) | RowError::HttpStatus(_))
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self(err.to_string())
    }
}
