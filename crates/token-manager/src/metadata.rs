//! The generic token/claims metadata map (spec.md §3) and the scope
//! normalization rules of spec.md §6.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

/// Arbitrary token or server metadata, keyed by field name.
///
/// Known fields per RFC 7662 (`active`, `scope`, `client_id`, `username`,
/// `exp`, `iat`, `nbf`, `sub`, `aud`, `iss`, `jti`) are accessed through the
/// typed helpers below; unknown fields are preserved as-is so a
/// `register` -> store -> `get` round-trip never loses IdP-specific data.
pub type Metadata = Map<String, Value>;

/// Read the `scope` field, assuming it has already been normalized to a
/// list of strings (see [`normalize_scope`]).
#[must_use]
pub fn scope_set(metadata: &Metadata) -> BTreeSet<String> {
    metadata
        .get("scope")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// Normalize the `scope` field in-place: a space-delimited string becomes a
/// list of strings. A `scope` field that is already a list, or absent, is
/// left untouched. This is lossy with respect to repeated/empty tokens in
/// the original space-delimited string, as spec.md §3 Invariant 1 allows.
pub fn normalize_scope(metadata: &mut Metadata) {
    if let Some(Value::String(scope)) = metadata.get("scope") {
        let scopes: Vec<Value> = scope
            .split_whitespace()
            .map(|s| Value::String(s.to_owned()))
            .collect();
        metadata.insert("scope".to_string(), Value::Array(scopes));
    }
}

/// Egress form of `scope`: a list of strings joined with a single space, as
/// spec.md §6 requires for outbound token/introspection/revocation
/// requests. Returns `None` if there is nothing to send.
#[must_use]
pub fn scope_to_wire(scopes: &[String]) -> Option<String> {
    if scopes.is_empty() {
        None
    } else {
        Some(scopes.join(" "))
    }
}

#[must_use]
pub fn get_str<'a>(metadata: &'a Metadata, field: &str) -> Option<&'a str> {
    metadata.get(field).and_then(Value::as_str)
}

#[must_use]
pub fn get_i64(metadata: &Metadata, field: &str) -> Option<i64> {
    metadata.get(field).and_then(Value::as_i64)
}

#[must_use]
pub fn get_bool(metadata: &Metadata, field: &str) -> Option<bool> {
    metadata.get(field).and_then(Value::as_bool)
}

/// Remove any key whose value is JSON `null`, as spec.md §4.5 step 4.c
/// requires when projecting new access-token metadata from a refresh-token
/// record.
pub fn drop_nulls(metadata: &mut Metadata) {
    metadata.retain(|_, v| !v.is_null());
}
