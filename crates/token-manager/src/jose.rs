//! JOSE seam (SPEC_FULL.md C8). Signature verification and decryption are
//! genuinely out of this crate's scope (spec.md §1): they require key
//! material this crate never sees, so they are modeled as traits the
//! caller implements (typically backed by `jsonwebtoken` or `josekit`).
//!
//! The one JOSE operation that needs no key material (peeking at a
//! compact JWS's payload without checking its signature) is implemented
//! directly, since there is nothing to inject.

use base64::Engine;
use serde_json::Value;

use crate::error::{Error, Result};

/// Verifies the signature on a compact JWS and returns its JSON payload.
pub trait JwsVerifier: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// Returns [`Error::UserinfoEndpointVerificationFailure`] (or an
    /// equivalent caller-defined error) if the signature does not verify.
    fn verify(&self, compact: &str, jwks: &Value, alg: &str) -> Result<Value>;
}

/// Decrypts a compact JWE and returns its (decrypted, still possibly
/// JWS-wrapped) payload.
pub trait JweDecrypter: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// Returns [`Error::UserinfoEndpointDecryptionFailure`] (or an
    /// equivalent caller-defined error) if decryption fails.
    fn decrypt(&self, compact: &str, jwks: &Value, alg: &str, enc: &str) -> Result<String>;
}

/// `true` if `token` has the 3-dot-separated-segment shape of a compact
/// JWS. A compact JWE has 5 segments, so this is sufficient to
/// distinguish the two without parsing either.
#[must_use]
pub fn is_compact_jws(token: &str) -> bool {
    token.split('.').count() == 3 && !token.is_empty()
}

/// `true` if `token` has the 5-dot-separated-segment shape of a compact
/// JWE.
#[must_use]
pub fn is_compact_jwe(token: &str) -> bool {
    token.split('.').count() == 5
}

/// Decode the payload of a compact JWS **without** verifying its
/// signature. Used only where the caller's trust is in the party handing
/// over the token (spec.md §4.6 `register_id_token`), never to make an
/// authorization decision.
///
/// # Errors
/// Returns [`Error::InvalidIDTokenRegistration`] if `token` is not a
/// well-formed compact JWS, or if its payload segment is not valid
/// base64url JSON.
pub fn peek_jws_payload(token: &str) -> Result<Value> {
    peek_jws_segment(token, 1)
}

/// Decode the (unverified) header of a compact JWS, to read `alg` before
/// dispatching to a [`JwsVerifier`] (spec.md §4.5 step 4b: the ID token in
/// a refresh-grant response names its own algorithm; there is no separate
/// client-configured override for it, unlike userinfo).
///
/// # Errors
/// Returns [`Error::InvalidIDTokenRegistration`] if `token` is not a
/// well-formed compact JWS.
pub fn peek_jws_header(token: &str) -> Result<Value> {
    peek_jws_segment(token, 0)
}

fn peek_jws_segment(token: &str, index: usize) -> Result<Value> {
    if !is_compact_jws(token) {
        return Err(Error::InvalidIDTokenRegistration);
    }
    let segment = token
        .split('.')
        .nth(index)
        .ok_or(Error::InvalidIDTokenRegistration)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| Error::InvalidIDTokenRegistration)?;
    serde_json::from_slice(&decoded).map_err(|_| Error::InvalidIDTokenRegistration)
}
