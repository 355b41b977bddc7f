//! Advisory per-ledger locks.
//!
//! Each ledger path maps to one lock file under a shared lock directory. The
//! lock file name is the BLAKE3 hash of the ledger path, so callers must build
//! ledger paths the same way every time. Lock files are never removed: a
//! storage directory can be deleted while its lock stays valid.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::{LedgerError, Result};

/// Default lock timeout
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default sleep between lock attempts
pub const DEFAULT_LOCK_POLL: Duration = Duration::from_millis(5);

/// Where lock files live and how long to wait for them.
#[derive(Debug, Clone)]
pub struct LockOptions {
    pub dir: PathBuf,
    pub timeout: Duration,
    pub poll: Duration,
}

impl LockOptions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            timeout: DEFAULT_LOCK_TIMEOUT,
            poll: DEFAULT_LOCK_POLL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Lock file guarding `ledger_path`.
    pub fn lock_path_for(&self, ledger_path: &Path) -> PathBuf {
        let hash = blake3::hash(ledger_path.to_string_lossy().as_bytes());
        let hex = hash.to_hex();
        self.dir.join(format!("{}.lock", &hex[..32]))
    }
}

/// Exclusive lock on one ledger. Released when dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Acquire the lock, polling until `options.timeout` has elapsed.
    pub fn acquire(lock_path: PathBuf, options: &LockOptions) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: lock_path,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_contended(&e) => {
                    let waited = start.elapsed();
                    if waited >= options.timeout {
                        keyshare_config::log_ledger_warn!(
                            "Lock wait timed out",
                            lock = tracing::field::display(lock_path.display()),
                            waited_ms = waited.as_millis() as u64,
                        );
                        return Err(LedgerError::LockTimeout {
                            path: lock_path,
                            waited,
                        });
                    }
                    std::thread::sleep(options.poll);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Closing the descriptor releases the flock too; unlock explicitly so
        // the release does not wait on the File drop order.
        let _ = FileExt::unlock(&self.file);
    }
}

/// `fs2` reports contention as the platform's lock error, which is not always
/// mapped to `WouldBlock`.
fn is_contended(e: &io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
