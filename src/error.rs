use std::io;
use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Requested name is not present in the container index.
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Block bytes do not form a valid index record or file record.
    #[error("Decode error: {0}")]
    Decode(String),
    /// The destination cannot accept the requested write.
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Invalid search pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl ArchiveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::NotFound(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, ArchiveError::Decode(_))
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        ArchiveError::Decode(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
