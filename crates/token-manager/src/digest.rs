//! Token digesting for log lines (spec.md §7): never log a raw token.

use sha2::{Digest, Sha256};

#[must_use]
pub(crate) fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
