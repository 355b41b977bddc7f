//! Per-origin download quotas.

use std::path::PathBuf;

use keyshare_ledger::{Ledger, LedgerRecord, LockOptions};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{Result, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub origin: String,
    pub remaining: u64,
}

impl LedgerRecord for QuotaRecord {
    fn key(&self) -> &str {
        &self.origin
    }
}

/// Remaining-download counters for every origin seen by one store.
#[derive(Debug, Clone)]
pub struct QuotaLedger {
    ledger: Ledger<QuotaRecord>,
}

impl QuotaLedger {
    pub fn new(path: impl Into<PathBuf>, locks: LockOptions) -> Self {
        Self {
            ledger: Ledger::new(path, locks),
        }
    }

    /// Charge one download to `origin`.
    ///
    /// An origin seen for the first time is seeded with `default_limit` and
    /// this download is not charged. An origin at zero fails with
    /// `QuotaExceeded` and nothing is written. Returns what is left.
    #[instrument(skip(self), level = "debug")]
    pub fn check_and_decrement(&self, origin: &str, default_limit: u64) -> Result<u64> {
        self.ledger.ensure()?;
        self.ledger.update(|records| -> Result<u64> {
            match records.iter_mut().find(|r| r.origin == origin) {
                None => {
                    records.push(QuotaRecord {
                        origin: origin.to_string(),
                        remaining: default_limit,
                    });
                    Ok(default_limit)
                }
                Some(record) if record.remaining == 0 => Err(StoreError::QuotaExceeded {
                    origin: origin.to_string(),
                }),
                Some(record) => {
                    record.remaining -= 1;
                    Ok(record.remaining)
                }
            }
        })
    }

    /// Remaining downloads for `origin`, or `None` if it never downloaded.
    pub fn remaining(&self, origin: &str) -> Result<Option<u64>> {
        Ok(self.ledger.get(origin)?.map(|r| r.remaining))
    }

    pub fn origins(&self) -> Result<Vec<QuotaRecord>> {
        Ok(self.ledger.read_all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quota(temp: &TempDir) -> QuotaLedger {
        QuotaLedger::new(
            temp.path().join("usersData/data.json"),
            LockOptions::new(temp.path().join(".locks")),
        )
    }

    #[test]
    fn test_first_download_is_free() {
        let temp = TempDir::new().unwrap();
        let q = quota(&temp);
        assert_eq!(q.check_and_decrement("10.0.0.1", 3).unwrap(), 3);
        assert_eq!(q.remaining("10.0.0.1").unwrap(), Some(3));
    }

    #[test]
    fn test_decrements_to_zero_then_fails_without_write() {
        let temp = TempDir::new().unwrap();
        let q = quota(&temp);
        q.check_and_decrement("o", 2).unwrap();
        assert_eq!(q.check_and_decrement("o", 2).unwrap(), 1);
        assert_eq!(q.check_and_decrement("o", 2).unwrap(), 0);

        let before = std::fs::read(temp.path().join("usersData/data.json")).unwrap();
        let err = q.check_and_decrement("o", 2).unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { ref origin } if origin == "o"));
        let after = std::fs::read(temp.path().join("usersData/data.json")).unwrap();
        assert_eq!(before, after);
        assert_eq!(q.remaining("o").unwrap(), Some(0));
    }

    #[test]
    fn test_origins_are_independent() {
        let temp = TempDir::new().unwrap();
        let q = quota(&temp);
        q.check_and_decrement("a", 1).unwrap();
        q.check_and_decrement("a", 1).unwrap();
        assert!(q.check_and_decrement("a", 1).is_err());

        assert_eq!(q.check_and_decrement("b", 1).unwrap(), 1);
        assert_eq!(q.origins().unwrap().len(), 2);
    }

    #[test]
    fn test_zero_limit_allows_only_the_first() {
        let temp = TempDir::new().unwrap();
        let q = quota(&temp);
        assert_eq!(q.check_and_decrement("z", 0).unwrap(), 0);
        assert!(q.check_and_decrement("z", 0).is_err());
    }

    #[test]
    fn test_unknown_origin_has_no_quota_record() {
        let temp = TempDir::new().unwrap();
        assert_eq!(quota(&temp).remaining("nobody").unwrap(), None);
    }
}
