//! Content-addressed fingerprints for cases and compiled artifacts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque identifier naming a case or an artifact's private storage.
///
/// Identical fingerprint implies identical bytes; collaborators may also
/// hand us fingerprints minted elsewhere, which are taken verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive a fingerprint from content.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            hex.push_str(&format!("{:02x}", byte));
        }
        Fingerprint(hex)
    }

    /// Accept an externally minted fingerprint.
    pub fn from_external(id: impl Into<String>) -> Self {
        Fingerprint(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fan-out path segments (`ab`, `cd`) taken from the leading bytes.
    /// Short external fingerprints fall back to a literal bucket so the
    /// 1:1 fingerprint-to-path mapping still holds.
    pub fn shard_segments(&self) -> (String, String) {
        let first = self.0.get(0..2).unwrap_or("??").to_string();
        let second = self.0.get(2..4).unwrap_or("??").to_string();
        (first, second)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
