//! Configuration hashing for change tracking.
//!
//! Hashes are taken over the canonical JSON rendering of a [`ConfigTree`], so
//! two configurations that differ only in key order or unset optional fields
//! hash identically.

use sha2::{Digest, Sha256};

use super::tree::ConfigTree;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the SHA-256 hash of a configuration tree.
    #[must_use]
    pub fn hash_tree(&self, tree: &ConfigTree) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tree.canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns the first 12 characters of a hash, for display.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..12).unwrap_or(hash)
    }
}
