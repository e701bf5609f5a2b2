// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the repository adapters.

use thiserror::Error;

/// Result type alias for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors that can occur while operating on a repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested object (blob, commit, branch or path) does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The given object ID is not well-formed for the SCM.
    #[error("Invalid object ID: {0}")]
    InvalidId(String),

    /// The requested event is not a known event type.
    #[error("Invalid event type.")]
    InvalidEvent,

    /// Hook-emitted event data could not be parsed.
    #[error("Could not parse event payload: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error reported by the SCM library or command.
    #[error("{0}")]
    Scm(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RepositoryError {
    /// Whether this error means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound(_))
    }
}

impl From<git2::Error> for RepositoryError {
    fn from(err: git2::Error) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => RepositoryError::NotFound(err.message().to_string()),
            _ => RepositoryError::Scm(err.message().to_string()),
        }
    }
}
