use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend task is gone (channel closed before or during a call).
    #[error("Store backend unavailable")]
    BackendClosed,

    /// A record could not be (de)serialized to a tree value.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// An optimistic transaction kept losing to concurrent writers.
    #[error("Transaction aborted after {0} attempts")]
    TransactionContention(usize),

    /// Blob upload exceeded the backend's size limit.
    #[error("Blob too large: {size} bytes (max {max})")]
    BlobTooLarge { size: usize, max: usize },

    /// Blob upload with no content.
    #[error("Empty blob")]
    EmptyBlob,

    /// No blob is stored under the given handle.
    #[error("Blob not found")]
    BlobNotFound,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
