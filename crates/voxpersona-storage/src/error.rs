use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The scenario/report/building triple does not exist or is mismatched.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("transcription not found: {source_name}")]
    TranscriptionNotFound { source_name: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
