pub mod storage;
pub mod transport;

use anyhow::Error as AnyhowError;
use config::ConfigError;
use std::{error::Error as StdError, io::Error as IoError};
pub use storage::StorageError;
use thiserror::Error;
use tokio::task::JoinError;
pub use transport::TransportError;

pub type MusterResult<T, E = MusterError> = anyhow::Result<T, E>;
pub type StorageResult<T, E = StorageError> = Result<T, E>;
pub type TransportResult<T, E = TransportError> = Result<T, E>;

#[derive(Error, Debug, Default)]
pub enum MusterError {
    #[error("service unavailable")]
    #[default]
    ServiceUnavailable,
    #[error("{0}")]
    JoinError(#[from] JoinError),
    #[error("{0}")]
    StdError(#[from] Box<dyn StdError + Send + Sync>),
    #[error("{0}")]
    IoError(#[from] IoError),
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    Anyhow(#[from] AnyhowError),
    #[error("{0}")]
    ConfigError(#[from] ConfigError),
    #[error("{0}")]
    StorageError(#[from] StorageError),
    #[error("{0}")]
    TransportError(#[from] TransportError),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Initialization error: {0}")]
    InitializationError(String),
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl From<String> for MusterError {
    #[inline]
    fn from(e: String) -> Self {
        MusterError::Msg(e)
    }
}

impl From<&str> for MusterError {
    #[inline]
    fn from(e: &str) -> Self {
        MusterError::Msg(e.to_string())
    }
}
