//! Owner/share token generation.
//!
//! Tokens are bearer credentials, not key material: possession of the owner
//! token grants delete, possession of the share token grants download. Both
//! come straight from the OS CSPRNG and have no relationship to each other.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Random bytes per token (hex-encoded to twice this length)
pub const TOKEN_BYTES: usize = 32;

/// Tokens handed back to the uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(rename = "privateKey")]
    pub owner: String,
    #[serde(rename = "publicKey")]
    pub share: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyGenerator;

impl KeyGenerator {
    pub fn generate(&self) -> TokenPair {
        TokenPair {
            owner: random_token(),
            share: random_token(),
        }
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Cheap shape check before touching any ledger.
pub fn looks_like_token(s: &str) -> bool {
    s.len() == TOKEN_BYTES * 2 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
