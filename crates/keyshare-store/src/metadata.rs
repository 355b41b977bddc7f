//! File metadata records.
//!
//! One ledger per storage directory, keyed by owner token. JSON field names
//! match the on-disk format (`privateKey`, `publicKey`, ...).

use std::path::PathBuf;

use keyshare_ledger::{Ledger, LedgerRecord};
use serde::{Deserialize, Serialize};

/// Ledger of every file stored in one directory.
pub type MetadataStore = Ledger<FileRecord>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "publicKey")]
    pub share_token: String,
    #[serde(rename = "privateKey")]
    pub owner_token: String,
    #[serde(rename = "filePath")]
    pub file_path: PathBuf,
}

impl LedgerRecord for FileRecord {
    fn key(&self) -> &str {
        &self.owner_token
    }
}

/// Which token field a lookup may match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Owner,
    Share,
    Any,
}

impl FileRecord {
    pub fn matches(&self, key: &str, kind: KeyKind) -> bool {
        match kind {
            KeyKind::Owner => self.owner_token == key,
            KeyKind::Share => self.share_token == key,
            KeyKind::Any => self.owner_token == key || self.share_token == key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FileRecord {
        FileRecord {
            file_name: "a.txt".to_string(),
            share_token: "pub".to_string(),
            owner_token: "priv".to_string(),
            file_path: PathBuf::from("/srv/files/pub_a.txt"),
        }
    }

    #[test]
    fn test_key_is_owner_token() {
        assert_eq!(record().key(), "priv");
    }

    #[test]
    fn test_matches_by_kind() {
        let r = record();
        assert!(r.matches("priv", KeyKind::Owner));
        assert!(!r.matches("pub", KeyKind::Owner));
        assert!(r.matches("pub", KeyKind::Share));
        assert!(!r.matches("priv", KeyKind::Share));
        assert!(r.matches("pub", KeyKind::Any));
        assert!(r.matches("priv", KeyKind::Any));
        assert!(!r.matches("other", KeyKind::Any));
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["fileName"], "a.txt");
        assert_eq!(json["publicKey"], "pub");
        assert_eq!(json["privateKey"], "priv");
        assert_eq!(json["filePath"], "/srv/files/pub_a.txt");
    }

    #[test]
    fn test_parses_existing_ledger_entry() {
        let text = r#"[{"privateKey":"k1","publicKey":"k2","fileName":"b.png","filePath":"/x/k2_b.png"}]"#;
        let records: Vec<FileRecord> = serde_json::from_str(text).unwrap();
        assert_eq!(records[0].owner_token, "k1");
        assert_eq!(records[0].file_name, "b.png");
    }
}
