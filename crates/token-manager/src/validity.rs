//! The validity predicate of spec.md §4.7 / Invariant §3.2.

use crate::metadata::{get_bool, get_i64, Metadata};

/// A token is valid iff:
/// - metadata has no `"valid": false`, AND
/// - there is no `exp`, or `exp >= now`, AND
/// - there is no `nbf`, or `nbf <= now`.
///
/// `now` is seconds since the Unix epoch, passed in by the caller so tests
/// can exercise boundary conditions deterministically.
#[must_use]
pub fn token_valid(metadata: &Metadata, now: i64) -> bool {
    if get_bool(metadata, "valid") == Some(false) {
        return false;
    }
    if let Some(exp) = get_i64(metadata, "exp") {
        if exp < now {
            return false;
        }
    }
    if let Some(nbf) = get_i64(metadata, "nbf") {
        if nbf > now {
            return false;
        }
    }
    true
}

#[must_use]
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serde_json::Map;

    fn metadata_with(pairs: &[(&str, serde_json::Value)]) -> Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn expired_token_is_invalid() {
        let metadata = metadata_with(&[("exp", json!(100))]);
        assert!(!token_valid(&metadata, 200));
    }

    #[test]
    fn not_yet_expired_token_is_valid() {
        let metadata = metadata_with(&[("exp", json!(300))]);
        assert!(token_valid(&metadata, 200));
    }

    #[test]
    fn not_yet_valid_token_is_invalid() {
        let metadata = metadata_with(&[("nbf", json!(300))]);
        assert!(!token_valid(&metadata, 200));
    }

    #[test]
    fn no_exp_or_nbf_is_valid() {
        let metadata = metadata_with(&[("sub", json!("user"))]);
        assert!(token_valid(&metadata, 200));
    }

    #[test]
    fn explicit_valid_false_sentinel_wins() {
        let metadata = metadata_with(&[("valid", json!(false)), ("exp", json!(i64::MAX))]);
        assert!(!token_valid(&metadata, 200));
    }
}
