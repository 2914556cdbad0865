use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid name: {0}")]
    Naming(String),

    #[error("project already exists: {0}")]
    DuplicateProject(String),

    #[error("repository already exists on disk: {}", .0.display())]
    RepoExists(PathBuf),

    #[error("cannot fork: {0}")]
    SelfFork(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid access level: {0}")]
    InvalidAccess(String),

    #[error("invalid ssh key: {0}")]
    InvalidSshKey(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Returns true for SQLite unique/primary-key violations.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Error::Database(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
                    && matches!(
                        err.extended_code,
                        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                            | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    )
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
