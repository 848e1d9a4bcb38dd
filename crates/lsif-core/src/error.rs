use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LsifError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// An error produced once and handed to every waiter of a shared load.
    #[error(transparent)]
    Shared(Arc<LsifError>),
}

impl LsifError {
    /// True only for an unknown dump or document. A missing file on the
    /// server's own side is an `Io` fault, not a lookup miss.
    pub fn is_not_found(&self) -> bool {
        match self {
            LsifError::NotFound(_) => true,
            LsifError::Shared(inner) => inner.is_not_found(),
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        match self {
            LsifError::Validation(_) => true,
            LsifError::Shared(inner) => inner.is_validation(),
            _ => false,
        }
    }
}

impl From<Arc<LsifError>> for LsifError {
    fn from(err: Arc<LsifError>) -> Self {
        LsifError::Shared(err)
    }
}

impl From<rusqlite::Error> for LsifError {
    fn from(err: rusqlite::Error) -> Self {
        LsifError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LsifError>;
