//! Error handling for the migration runner

use std::fmt;
use thiserror::Error;

/// Unified error type for everything that can stop a run before it starts.
///
/// Per-statement failures are not errors: they are recorded as
/// [`StatementOutcome`](crate::runner::StatementOutcome) values.
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Service credential could not be decoded
    #[error("Credential error: {0}")]
    Credential(#[from] jsonwebtoken::errors::Error),

    /// Reading a migration file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQL text could not be split into statements
    #[error("SQL error: {0}")]
    Sql(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new SQL splitting error
    pub fn sql<T: fmt::Display>(msg: T) -> Self {
        Error::Sql(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
