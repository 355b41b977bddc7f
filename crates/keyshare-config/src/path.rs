//! Path helpers shared by the store and the CLI.

use std::path::{Path, PathBuf};

/// Expand a leading `~` against the home directory.
///
/// Paths without a leading `~`, or hosts without a resolvable home
/// directory, are returned unchanged.
pub fn expand_home(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Check if a path is lexically within a directory (security check for path
/// traversal).
///
/// Rejects any path carrying `..` components, then compares prefixes. Works
/// for paths that do not exist yet, unlike a canonicalizing check.
pub fn is_within_directory(path: impl AsRef<Path>, dir: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    if path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return false;
    }
    path.starts_with(dir.as_ref())
}
