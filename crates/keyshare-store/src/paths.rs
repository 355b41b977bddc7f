//! Mapping between stored names, on-disk locations and tokens.
//!
//! ## Directory Layout
//!
//! ```text
//! <root>/
//! ├── <folder>/
//! │   ├── data.json                 # file ledger
//! │   └── <share token>_<name>      # blobs
//! ├── usersData/
//! │   └── data.json                 # quota ledger
//! ├── .staging/                     # uploads still being written
//! └── .locks/
//!     └── <hash>.lock               # one per ledger
//! ```

use std::path::{Path, PathBuf};

use keyshare_config::path::is_within_directory;
use keyshare_config::StorageConfig;
use keyshare_ledger::Ledger;

use crate::keys::looks_like_token;
use crate::metadata::{FileRecord, KeyKind};
use crate::{Result, StoreError};

pub const LEDGER_FILE: &str = "data.json";
pub const QUOTA_DIR: &str = "usersData";
pub const LOCK_DIR: &str = ".locks";
pub const STAGING_DIR: &str = ".staging";

/// Longest accepted client file name, leaving room for the token prefix
/// within a 255-byte file name limit.
pub const MAX_FILE_NAME: usize = 180;

/// Locations derived from one stored name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub blob_path: PathBuf,
    pub ledger_path: PathBuf,
    pub dir_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    folder: String,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>, folder: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            folder: folder.into(),
        }
    }

    /// Build from config, rejecting a folder that would share a path with
    /// the quota ledger, lock files, staging area or delete tombstones.
    pub fn from_config(storage: &StorageConfig) -> Result<Self> {
        Self::validate_folder(&storage.folder)?;
        Ok(Self::new(storage.root_dir(), storage.folder.clone()))
    }

    pub fn validate_folder(folder: &str) -> Result<()> {
        let invalid = folder.is_empty()
            || folder.starts_with('.')
            || folder.contains(['/', '\\'])
            || folder == QUOTA_DIR
            || folder.chars().any(char::is_control);
        if invalid {
            return Err(StoreError::InvalidFolder(folder.to_string()));
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_path(&self) -> PathBuf {
        self.root.join(&self.folder)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir_path().join(LEDGER_FILE)
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.root.join(LOCK_DIR)
    }

    /// Where an upload is written before it is committed into the folder.
    pub fn staging_path(&self, stored_name: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(stored_name)
    }

    pub fn resolve(&self, stored_name: &str) -> ResolvedPaths {
        let dir_path = self.dir_path();
        ResolvedPaths {
            blob_path: dir_path.join(stored_name),
            ledger_path: dir_path.join(LEDGER_FILE),
            dir_path,
        }
    }

    /// Quota ledger for a blob: `usersData/data.json` two levels above it.
    pub fn quota_ledger_path(&self, blob_path: &Path) -> PathBuf {
        let base = blob_path
            .parent()
            .and_then(Path::parent)
            .unwrap_or(self.root.as_path());
        base.join(QUOTA_DIR).join(LEDGER_FILE)
    }

    /// Blob name for an upload. The share token prefix keeps two uploads of
    /// the same name apart.
    pub fn stored_name(share_token: &str, file_name: &str) -> String {
        format!("{}_{}", share_token, file_name)
    }

    /// Reduce a client-supplied name to a safe final path component.
    pub fn sanitize_file_name(raw: &str) -> Result<String> {
        let name = raw
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name == LEDGER_FILE
            || name.len() > MAX_FILE_NAME
            || name.chars().any(char::is_control);
        if invalid {
            return Err(StoreError::InvalidFileName(raw.to_string()));
        }
        Ok(name.to_string())
    }

    /// Find the record a token points at, stopping at the first match.
    ///
    /// Records whose path escapes the storage directory are treated as
    /// missing.
    pub fn reverse_resolve(
        &self,
        files: &Ledger<FileRecord>,
        key: &str,
        kind: KeyKind,
    ) -> Result<FileRecord> {
        if !looks_like_token(key) {
            return Err(StoreError::NotFound);
        }
        let record = files
            .find(|r| r.matches(key, kind))?
            .ok_or(StoreError::NotFound)?;
        if !is_within_directory(&record.file_path, self.dir_path()) {
            keyshare_config::log_store_warn!(
                "Ledger entry points outside storage directory",
                path = tracing::field::display(record.file_path.display()),
            );
            return Err(StoreError::NotFound);
        }
        Ok(record)
    }
}
