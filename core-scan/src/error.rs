use core_collection::CollectionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tag read failed: {0}")]
    TagRead(String),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Scan job {0} not found")]
    JobNotFound(String),

    #[error("Another scan is already running")]
    ScanInProgress,

    #[error("Invalid scan job transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

pub type Result<T> = std::result::Result<T, ScanError>;
