//! Error taxonomy for every record store operation.
//!
//! Variants carry a rendered message instead of the source error so the whole
//! value stays `Clone` and can be serialized as `{"kind": ..., "message": ...}`
//! for a UI layer that renders localized messages from [`StoreError::kind`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum StoreError {
    /// The environment could not be opened or upgraded. Retryable.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A transaction against an open environment failed.
    #[error("Database error: {0}")]
    Engine(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// An operation targeted a sub-item that does not exist.
    ///
    /// Absent records on plain reads are returned as `None`, never as this.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Stable code for the variant, suitable as a translation key.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Connection(_) => "connection",
            StoreError::Engine(_) => "engine",
            StoreError::Serialization(_) => "serialization",
            StoreError::Validation(_) => "validation",
            StoreError::NotFound(_) => "not_found",
            StoreError::Configuration(_) => "configuration",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    pub(crate) fn connection(context: &str, err: impl std::fmt::Display) -> Self {
        StoreError::Connection(format!("{context}: {err}"))
    }
}

impl From<lmdb::Error> for StoreError {
    fn from(err: lmdb::Error) -> Self {
        match err {
            lmdb::Error::MapFull => {
                StoreError::Engine("storage quota exceeded (map full)".to_string())
            }
            lmdb::Error::Corrupted | lmdb::Error::PageNotFound => {
                StoreError::Engine(format!("database is corrupted: {err}"))
            }
            lmdb::Error::ReadersFull => {
                StoreError::Engine("no reader slots available".to_string())
            }
            lmdb::Error::BadValSize => {
                StoreError::Validation(format!("key or value size rejected: {err}"))
            }
            _ => StoreError::Engine(format!("{err}")),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(format!("JSON serialization error: {err}"))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Engine(format!("storage task did not complete: {err}"))
    }
}
