//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated storage root
//! - A scratch directory for source files
//! - A `Config` pointing at both
//!
//! # Usage
//!
//! ```ignore
//! use keyshare_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let config = env.config();
//!     // config.storage.root is unique to this test
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Storage root handed to the store
    pub store_root: PathBuf,
    /// Scratch area for files to upload
    pub scratch_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let store_root = root.join("store");
        let scratch_dir = root.join("scratch");
        std::fs::create_dir_all(&store_root)?;
        std::fs::create_dir_all(&scratch_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            store_root,
            scratch_dir,
            test_id,
        })
    }

    /// Config rooted in this environment, with a short lock timeout so a
    /// stuck lock fails the test instead of hanging it.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.root = self.store_root.clone();
        cfg.ledger.lock_timeout_ms = 5_000;
        cfg.ledger.lock_poll_ms = 1;
        cfg
    }

    /// Same as `config()` with a specific per-origin download limit.
    pub fn config_with_limit(&self, download_limit: u64) -> Config {
        let mut cfg = self.config();
        cfg.quota.download_limit = download_limit;
        cfg
    }

    /// Directory holding blobs and the file ledger
    pub fn folder_dir(&self) -> PathBuf {
        self.store_root.join(Config::default().storage.folder)
    }

    /// Create a scratch file with content
    pub fn create_file(&self, name: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.scratch_dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Environment variables that point a spawned process at this store.
    pub fn store_env(&self) -> Vec<(String, String)> {
        vec![(
            crate::ENV_ROOT.to_string(),
            self.store_root.to_string_lossy().into_owned(),
        )]
    }
}
