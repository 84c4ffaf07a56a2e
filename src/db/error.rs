use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("database query failed: {0}")]
    Query(String),

    #[error("database migration failed: {0}")]
    Migration(String),

    /// SQLite write-lock contention. Retryable with backoff.
    #[error("database is locked")]
    Locked,

    /// Uniqueness violation. Expected race between concurrent callers,
    /// converted to a no-op by the services.
    #[error("uniqueness conflict: {0}")]
    Conflict(String),
}

impl DatabaseError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::Locked)
    }
}

impl From<diesel::result::Error> for DatabaseError {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match e {
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                DatabaseError::Conflict(info.message().to_string())
            }
            Error::DatabaseError(_, ref info) if info.message().contains("database is locked") => {
                DatabaseError::Locked
            }
            other => DatabaseError::Query(other.to_string()),
        }
    }
}
