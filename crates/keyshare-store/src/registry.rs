//! Upload, download, delete and token checks over the ledgers and blobs.

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keyshare_config::{log_store_debug, log_store_info, log_store_warn, Config};
use keyshare_ledger::LockOptions;
use tracing::instrument;

use crate::blob::{BlobStore, FsBlobStore};
use crate::keys::{KeyGenerator, TokenPair};
use crate::metadata::{FileRecord, KeyKind, MetadataStore};
use crate::paths::{PathResolver, LEDGER_FILE};
use crate::quota::QuotaLedger;
use crate::{Result, StoreError};

/// An open download.
pub struct Download {
    pub stream: Box<dyn Read + Send>,
    pub content_type: String,
    pub file_name: String,
    /// Downloads left for the requesting origin after this one
    pub remaining: u64,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("content_type", &self.content_type)
            .field("file_name", &self.file_name)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

/// Statistics about the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Records in the file ledger
    pub file_count: u64,
    /// Bytes held by blobs that exist
    pub total_bytes: u64,
    /// Records whose blob is gone
    pub missing_blobs: u64,
    /// Origins with a quota record
    pub origin_count: u64,
}

/// Token-addressed file store.
pub struct FileRegistry {
    resolver: PathResolver,
    files: MetadataStore,
    locks: LockOptions,
    download_limit: u64,
    keys: KeyGenerator,
    blobs: Arc<dyn BlobStore>,
}

impl FileRegistry {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_blob_store(config, Arc::new(FsBlobStore))
    }

    pub fn with_blob_store(config: &Config, blobs: Arc<dyn BlobStore>) -> Result<Self> {
        let resolver = PathResolver::from_config(&config.storage)?;
        let locks = LockOptions::new(resolver.lock_dir())
            .with_timeout(config.ledger.lock_timeout())
            .with_poll(config.ledger.lock_poll());
        let files = MetadataStore::new(resolver.ledger_path(), locks.clone());
        Ok(Self {
            resolver,
            files,
            locks,
            download_limit: config.quota.download_limit,
            keys: KeyGenerator,
            blobs,
        })
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn download_limit(&self) -> u64 {
        self.download_limit
    }

    fn metadata_store(&self, ledger_path: &Path) -> MetadataStore {
        MetadataStore::new(ledger_path, self.locks.clone())
    }

    fn quota_ledger(&self, blob_path: &Path) -> QuotaLedger {
        QuotaLedger::new(self.resolver.quota_ledger_path(blob_path), self.locks.clone())
    }

    /// Store `data` under `file_name` and hand back fresh tokens.
    ///
    /// The blob is streamed into a staging area first. It is moved into the
    /// folder and recorded under the folder ledger's lock, so a record never
    /// exists without its blob and a concurrent delete of the folder cannot
    /// pull the directory out from under the commit.
    #[instrument(skip(self, data), level = "debug")]
    pub fn upload<R: Read>(&self, file_name: &str, mut data: R) -> Result<TokenPair> {
        let file_name = PathResolver::sanitize_file_name(file_name)?;
        let tokens = self.keys.generate();
        let stored_name = PathResolver::stored_name(&tokens.share, &file_name);
        let paths = self.resolver.resolve(&stored_name);
        let staged = self.resolver.staging_path(&stored_name);

        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = self.blobs.write(&staged, &mut data)?;

        let record = FileRecord {
            file_name,
            share_token: tokens.share.clone(),
            owner_token: tokens.owner.clone(),
            file_path: paths.blob_path.clone(),
        };
        if let Err(e) = self.commit(&staged, record) {
            if self.blobs.exists(&staged) {
                if let Err(cleanup) = self.blobs.remove(&staged) {
                    log_store_warn!(
                        "Could not remove staged upload",
                        blob = tracing::field::display(staged.display()),
                        error = tracing::field::display(&cleanup),
                    );
                }
            }
            return Err(e);
        }

        log_store_info!("Upload stored", bytes = bytes, backend = self.blobs.name());
        Ok(tokens)
    }

    fn commit(&self, staged: &Path, record: FileRecord) -> Result<()> {
        let blob_path = record.file_path.clone();
        let dir_path = blob_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or(StoreError::NotFound)?;
        let store = self.metadata_store(&dir_path.join(LEDGER_FILE));

        let guard = store.lock()?;
        fs::create_dir_all(&dir_path)?;
        let mut records = guard.read()?;
        self.blobs.rename(staged, &blob_path)?;
        match records.iter().position(|r| r.owner_token == record.owner_token) {
            Some(index) => records[index] = record,
            None => records.push(record),
        }
        if let Err(e) = guard.write(&records) {
            if let Err(restore) = self.blobs.rename(&blob_path, staged) {
                log_store_warn!(
                    "Could not move blob back after failed ledger update",
                    blob = tracing::field::display(blob_path.display()),
                    error = tracing::field::display(&restore),
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    pub fn upload_bytes(&self, file_name: &str, data: &[u8]) -> Result<TokenPair> {
        self.upload(file_name, data)
    }

    /// Open a stored file for `origin`, charging its download quota.
    ///
    /// Either token works. The blob is opened before the quota is charged so
    /// a dangling record never costs a download.
    #[instrument(skip(self, token), level = "debug")]
    pub fn download(&self, token: &str, origin: &str) -> Result<Download> {
        let record = self
            .resolver
            .reverse_resolve(&self.files, token, KeyKind::Any)?;
        let stream = self
            .blobs
            .open(&record.file_path)
            .map_err(StoreError::from_blob_io)?;

        let remaining = self
            .quota_ledger(&record.file_path)
            .check_and_decrement(origin, self.download_limit)?;

        let content_type = mime_guess::from_path(&record.file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        log_store_info!("Download granted", origin = origin, remaining = remaining);
        Ok(Download {
            stream,
            content_type,
            file_name: record.file_name,
            remaining,
        })
    }

    /// Remove a stored file. Only the owner token is accepted.
    ///
    /// Runs under the directory ledger's lock. The last file in a directory
    /// takes the whole directory with it; otherwise the blob is moved aside,
    /// the record removed, and only then the blob unlinked, so a failed ledger
    /// write puts the blob back.
    #[instrument(skip(self, owner_token), level = "debug")]
    pub fn delete(&self, owner_token: &str) -> Result<()> {
        let found = self
            .resolver
            .reverse_resolve(&self.files, owner_token, KeyKind::Owner)?;
        let dir_path = found
            .file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or(StoreError::NotFound)?;
        let ledger_path = dir_path.join(LEDGER_FILE);
        let store = self.metadata_store(&ledger_path);

        let guard = store.lock()?;
        let mut records = guard.read()?;
        let index = records
            .iter()
            .position(|r| r.owner_token == owner_token)
            .ok_or(StoreError::NotFound)?;
        let blob_path = records[index].file_path.clone();

        if !self.blobs.exists(&blob_path) {
            log_store_warn!(
                "Dropping record whose blob is already gone",
                blob = tracing::field::display(blob_path.display()),
            );
            records.remove(index);
            guard.write(&records)?;
            return Ok(());
        }

        if records.len() == 1 && only_entries(&dir_path, &[&ledger_path, &blob_path])? {
            // Renaming the directory drops blob and record in one step.
            let tombstone = dir_tombstone(&dir_path);
            fs::rename(&dir_path, &tombstone)?;
            drop(guard);
            discard_tombstone_dir(&tombstone);
            log_store_info!(
                "Deleted last file and its directory",
                dir = tracing::field::display(dir_path.display()),
            );
            return Ok(());
        }

        let tombstone = blob_tombstone(&blob_path);
        self.blobs.rename(&blob_path, &tombstone)?;
        records.remove(index);
        if let Err(e) = guard.write(&records) {
            if let Err(restore) = self.blobs.rename(&tombstone, &blob_path) {
                log_store_warn!(
                    "Could not restore blob after failed ledger update",
                    blob = tracing::field::display(blob_path.display()),
                    error = tracing::field::display(&restore),
                );
            }
            return Err(e.into());
        }
        drop(guard);
        // The record is gone; a leftover tombstone is only wasted space.
        if let Err(e) = self.blobs.remove(&tombstone) {
            log_store_warn!(
                "Could not remove deleted blob",
                blob = tracing::field::display(tombstone.display()),
                error = tracing::field::display(&e),
            );
        }

        log_store_info!("Deleted file", remaining_files = records.len());
        Ok(())
    }

    /// `Ok(true)` if `key` is the share token of a stored file, `Ok(false)`
    /// if it names a stored file through its owner token, `NotFound` if it
    /// names nothing or the blob is gone.
    pub fn is_valid_share_token(&self, key: &str) -> Result<bool> {
        self.validate(key, KeyKind::Share)
    }

    /// Owner-token counterpart of [`Self::is_valid_share_token`].
    pub fn is_valid_owner_token(&self, key: &str) -> Result<bool> {
        self.validate(key, KeyKind::Owner)
    }

    fn validate(&self, key: &str, kind: KeyKind) -> Result<bool> {
        let record = self.resolver.reverse_resolve(&self.files, key, KeyKind::Any)?;
        if !self.blobs.exists(&record.file_path) {
            return Err(StoreError::NotFound);
        }
        let ledger_path = record
            .file_path
            .parent()
            .map(|dir| dir.join(LEDGER_FILE))
            .ok_or(StoreError::NotFound)?;
        let valid = self
            .metadata_store(&ledger_path)
            .find(|r| r.matches(key, kind))?
            .is_some();
        log_store_debug!("Token checked", valid = valid);
        Ok(valid)
    }

    /// Every record in the file ledger.
    pub fn list(&self) -> Result<Vec<FileRecord>> {
        Ok(self.files.read_all()?)
    }

    /// Remaining downloads for `origin` without charging one.
    pub fn quota(&self, origin: &str) -> Result<Option<u64>> {
        self.quota_ledger(&self.resolver.ledger_path()).remaining(origin)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for record in self.files.read_all()? {
            stats.file_count += 1;
            match self.blobs.size(&record.file_path) {
                Ok(size) => stats.total_bytes += size,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => stats.missing_blobs += 1,
                Err(e) => return Err(e.into()),
            }
        }
        stats.origin_count = self
            .quota_ledger(&self.resolver.ledger_path())
            .origins()?
            .len() as u64;
        Ok(stats)
    }
}

/// True when `dir` holds nothing besides `expected`.
fn only_entries(dir: &Path, expected: &[&PathBuf]) -> Result<bool> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !expected.iter().any(|p| **p == path) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn discard_tombstone_dir(tombstone: &Path) {
    if let Err(e) = fs::remove_dir_all(tombstone) {
        log_store_warn!(
            "Could not remove deleted directory",
            dir = tracing::field::display(tombstone.display()),
            error = tracing::field::display(&e),
        );
    }
}

fn blob_tombstone(blob_path: &Path) -> PathBuf {
    let name = blob_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    blob_path.with_file_name(format!(".{}.deleting", name))
}

fn dir_tombstone(dir_path: &Path) -> PathBuf {
    let name = dir_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir_path.with_file_name(format!(".{}.deleting-{:016x}", name, rand::random::<u64>()))
}
