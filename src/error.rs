use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Vendor API error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid queue message: {0}")]
    InvalidMessage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No raw readings provided for user {user_id}")]
    EmptyInput { user_id: String },

    #[error(
        "Failed to normalize any readings for user {user_id}: \
         total {total}, skipped {skipped}, errors {errored}"
    )]
    AllRecordsInvalid {
        user_id: String,
        total: usize,
        skipped: usize,
        errored: usize,
    },

    #[error("No readings found for user {user_id} in the reporting window")]
    NoReadings { user_id: String },

    #[error("{0}")]
    Other(String),
}

/// How the queue should treat a failed work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Redelivery may succeed (network, vendor outage, store contention).
    Retryable,
    /// Redelivery will produce the same failure.
    Fatal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Http(_) | Error::Database(_) | Error::Other(_) => ErrorKind::Retryable,
            Error::Migration(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::InvalidMessage(_)
            | Error::NotFound(_)
            | Error::EmptyInput { .. }
            | Error::AllRecordsInvalid { .. }
            | Error::NoReadings { .. } => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
