use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No usable database connection")]
    Connection,

    #[error("Storage handle is closed")]
    Closed,

    #[error("Statement rejected by backend: {message}")]
    Statement { message: String },
}

impl StorageError {
    /// Map an `sqlx` error onto the storage taxonomy: backend-reported
    /// statement failures keep their message, everything else is a
    /// connection-level failure.
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Database(db) => StorageError::Statement {
                message: db.message().to_string(),
            },
            sqlx::Error::PoolClosed => StorageError::Closed,
            _ => StorageError::Connection,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
