use std::{io, result};

use thiserror::Error;

pub type Result<T, E = Error> = result::Result<T, E>;

/// Error types for genomicdb operations, grouped by cause.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Page(#[from] pagedb::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Query plan error: {0}")]
    QueryPlan(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}
