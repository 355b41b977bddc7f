//! # keyshare-ledger
//!
//! Keyed record ledgers persisted as pretty-printed JSON arrays.
//!
//! A [`Ledger`] owns read-modify-write access to one file. Every mutation:
//! 1. takes the ledger's exclusive lock (see [`lock`])
//! 2. reads the whole array (missing or blank file reads as `[]`)
//! 3. applies the change in memory
//! 4. writes the whole array to a temp file and renames it over the ledger
//!
//! Readers do not lock: the rename guarantees they see either the old or the
//! new array, never a torn write.

pub mod lock;

pub use lock::{LockGuard, LockOptions};

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt ledger {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Timed out after {waited:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// A record stored in a ledger, identified by a unique string key.
pub trait LedgerRecord: Serialize + DeserializeOwned + Clone + PartialEq {
    fn key(&self) -> &str;
}

/// One JSON ledger file of `R` records.
#[derive(Debug, Clone)]
pub struct Ledger<R> {
    path: PathBuf,
    locks: LockOptions,
    _record: PhantomData<fn() -> R>,
}

impl<R: LedgerRecord> Ledger<R> {
    pub fn new(path: impl Into<PathBuf>, locks: LockOptions) -> Self {
        Self {
            path: path.into(),
            locks,
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Take the ledger's exclusive lock for a multi-step change.
    pub fn lock(&self) -> Result<LedgerGuard<'_, R>> {
        let lock = LockGuard::acquire(self.locks.lock_path_for(&self.path), &self.locks)?;
        Ok(LedgerGuard { ledger: self, _lock: lock })
    }

    /// Create the parent directory and an empty ledger if absent.
    ///
    /// Idempotent. Both steps run under the lock so a concurrent writer never
    /// sees the directory without its ledger being initialised.
    pub fn ensure(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        let guard = self.lock()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !self.path.exists() {
            guard.write(&[])?;
            keyshare_config::log_ledger_debug!(
                "Initialised empty ledger",
                path = tracing::field::display(self.path.display()),
            );
        }
        Ok(())
    }

    /// All records in file order.
    pub fn read_all(&self) -> Result<Vec<R>> {
        read_records(&self.path)
    }

    /// First record with `key`.
    pub fn get(&self, key: &str) -> Result<Option<R>> {
        Ok(self.read_all()?.into_iter().find(|r| r.key() == key))
    }

    /// First record matching `pred`.
    pub fn find<P>(&self, pred: P) -> Result<Option<R>>
    where
        P: FnMut(&R) -> bool,
    {
        Ok(self.read_all()?.into_iter().find(pred))
    }

    /// Replace the record with the same key in place, or append it.
    #[instrument(skip(self, record), fields(path = %self.path.display()), level = "debug")]
    pub fn upsert(&self, record: R) -> Result<()> {
        self.update(|records: &mut Vec<R>| -> Result<()> {
            match records.iter().position(|r| r.key() == record.key()) {
                Some(index) => records[index] = record,
                None => records.push(record),
            }
            Ok(())
        })
    }

    /// Remove the record with `key`. Absent keys are a no-op and return `None`.
    #[instrument(skip(self), fields(path = %self.path.display()), level = "debug")]
    pub fn remove(&self, key: &str) -> Result<Option<R>> {
        self.update(|records: &mut Vec<R>| -> Result<Option<R>> {
            Ok(records
                .iter()
                .position(|r| r.key() == key)
                .map(|index| records.remove(index)))
        })
    }

    /// Run `f` over the records under the lock and persist the result if it
    /// changed. An `Err` from `f` leaves the file untouched.
    pub fn update<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Vec<R>) -> std::result::Result<T, E>,
        E: From<LedgerError>,
    {
        let guard = self.lock()?;
        let before = guard.read()?;
        let mut records = before.clone();
        let value = f(&mut records)?;
        if records != before {
            guard.write(&records)?;
        }
        Ok(value)
    }
}

/// Proof that the ledger's lock is held. Reads and writes through the guard
/// are the read-modify-write critical section.
pub struct LedgerGuard<'a, R> {
    ledger: &'a Ledger<R>,
    _lock: LockGuard,
}

impl<R: LedgerRecord> LedgerGuard<'_, R> {
    pub fn read(&self) -> Result<Vec<R>> {
        read_records(&self.ledger.path)
    }

    /// Replace the whole ledger atomically (temp file + rename).
    pub fn write(&self, records: &[R]) -> Result<()> {
        let path = &self.ledger.path;
        let tmp_path = tmp_path_for(path);

        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(&file);
        serde_json::to_writer_pretty(&mut writer, records)?;
        writer.flush()?;
        drop(writer);
        file.sync_all()?;

        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        keyshare_config::log_ledger_debug!(
            "Ledger written",
            path = tracing::field::display(path.display()),
            records = records.len(),
        );
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.tmp", name))
}

fn read_records<R: DeserializeOwned>(path: &Path) -> Result<Vec<R>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&data).map_err(|source| LedgerError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}
