use core_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("No {dimension} named '{name}'")]
    DimensionNotFound { dimension: String, name: String },

    #[error("Schema migration failed for {family} tables: {message}")]
    Migration { family: String, message: String },

    #[error("Unbalanced AND/OR group nesting in query specification")]
    UnbalancedGroup,

    #[error("Query aborted")]
    Aborted,

    #[error("Invalid query maker state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, CollectionError>;
