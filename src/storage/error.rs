use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("malformed record: {0}")]
    Decode(String),
    #[error("connection poisoned")]
    ConnectionPoisoned,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
