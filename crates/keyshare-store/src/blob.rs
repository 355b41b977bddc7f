//! Blob I/O behind a trait so the registry never touches raw bytes itself.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

/// Byte-level storage used by [`crate::FileRegistry`].
///
/// Implementations must make `write` all-or-nothing: after an error no blob
/// exists at `path`.
pub trait BlobStore: Send + Sync {
    /// Stream `data` into a new blob at `path`, returning the byte count.
    fn write(&self, path: &Path, data: &mut dyn Read) -> io::Result<u64>;

    /// Open a blob for reading.
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    fn size(&self, path: &Path) -> io::Result<u64>;

    /// Backend name for logging/debugging
    fn name(&self) -> &'static str;
}

/// Plain filesystem blobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsBlobStore;

impl BlobStore for FsBlobStore {
    fn write(&self, path: &Path, data: &mut dyn Read) -> io::Result<u64> {
        // Unique temp name so parallel uploads into one directory never
        // share a partial file; the leading dot keeps it out of blob counts.
        let file_name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "blob path has no file name"))?
            .to_string_lossy()
            .into_owned();
        let temp_name = format!(
            ".{}.{}.{:?}.tmp",
            file_name,
            std::process::id(),
            std::thread::current().id()
        );
        let temp_path = path.with_file_name(temp_name);

        let result = (|| -> io::Result<u64> {
            let mut file = File::create(&temp_path)?;
            let written = io::copy(data, &mut file)?;
            file.flush()?;
            file.sync_all()?;
            fs::rename(&temp_path, path)?;
            Ok(written)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}
