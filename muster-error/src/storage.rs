use std::io::Error as IoError;
use thiserror::Error;

/// Failures of the append-only results log.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Log file or its parent directory could not be created/opened
    #[error("failed to open results log '{path}': {source}")]
    Open { path: String, source: IoError },
    /// Write of a committed record failed; the record must be considered lost
    #[error("failed to append record to results log: {source}")]
    Append { source: IoError },
    /// Flush or sync after an append failed; durability is not guaranteed
    #[error("failed to flush results log: {source}")]
    Flush { source: IoError },
}
