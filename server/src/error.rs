use std::io;
use std::path::PathBuf;

use crate::codec::CodecError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the image store core.
///
/// Transient "resource busy" failures while deleting are retried inside
/// [`crate::fs_store::FsStore::delete`] and only show up here as [`Error::Storage`]
/// once the retries are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rejected input, reported before any I/O happens
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Codec failure while decoding, resizing or encoding
    #[error("image processing failed: {0}")]
    Processing(#[from] CodecError),
    #[error("storage failure at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    /// Stable machine readable code used in API error bodies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "INVALID_PARAMETER",
            Error::NotFound(_) => "FILE_NOT_FOUND",
            Error::Processing(_) => "PROCESSING_FAILED",
            Error::Storage { .. } => "STORAGE_FAILED",
        }
    }
}
