use std::io;
use std::path::PathBuf;
use std::time::Duration;

use keyshare_ledger::LedgerError;
use thiserror::Error;

/// Errors surfaced by [`crate::FileRegistry`] operations.
///
/// Tokens are bearer secrets and are never included in error messages.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No stored file matches the given token")]
    NotFound,

    #[error("Download limit reached for origin {origin}")]
    QuotaExceeded { origin: String },

    #[error("Storage I/O error: {0}")]
    StorageIo(#[from] io::Error),

    #[error("Ledger {path} is busy: gave up after {waited:?}")]
    ConflictingWrite { path: PathBuf, waited: Duration },

    #[error("Corrupt ledger {path}: {source}")]
    CorruptLedger {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid file name {0:?}")]
    InvalidFileName(String),

    #[error("Invalid storage folder {0:?}: must be a plain name not used by the store itself")]
    InvalidFolder(String),
}

impl From<LedgerError> for StoreError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Io(e) => StoreError::StorageIo(e),
            LedgerError::Json(e) => StoreError::StorageIo(io::Error::new(io::ErrorKind::InvalidData, e)),
            LedgerError::Corrupt { path, source } => StoreError::CorruptLedger { path, source },
            LedgerError::LockTimeout { path, waited } => StoreError::ConflictingWrite { path, waited },
        }
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    /// Map a missing blob to `NotFound`, other I/O failures to `StorageIo`.
    pub(crate) fn from_blob_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound
        } else {
            StoreError::StorageIo(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
