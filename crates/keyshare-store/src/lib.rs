//! # keyshare-store
//!
//! Token-addressed file store. An upload returns two random tokens: the
//! owner token deletes the file, either token downloads it. Downloads are
//! metered per origin against a configurable limit.
//!
//! ## Ledgers
//!
//! Metadata lives in two JSON ledgers, both managed by `keyshare-ledger`:
//! - `<folder>/data.json`: one [`FileRecord`] per stored file
//! - `usersData/data.json`: one [`QuotaRecord`] per origin
//!
//! Every read-modify-write of a ledger runs under that ledger's exclusive
//! lock, so concurrent requests in one or several processes never lose an
//! update.
//!
//! See [`paths`] for the full directory layout.

mod blob;
mod error;
mod keys;
mod metadata;
pub mod paths;
mod quota;
mod registry;

pub use blob::{BlobStore, FsBlobStore};
pub use error::{Result, StoreError};
pub use keys::{looks_like_token, KeyGenerator, TokenPair, TOKEN_BYTES};
pub use metadata::{FileRecord, KeyKind, MetadataStore};
pub use paths::{PathResolver, ResolvedPaths};
pub use quota::{QuotaLedger, QuotaRecord};
pub use registry::{Download, FileRegistry, StoreStats};
