//! The persistence contract (C1, spec.md §4.1) and its default
//! implementation (C2, spec.md §4.2).

mod local;

pub use local::{LocalStore, LocalStoreOptions};

use crate::metadata::Metadata;

/// A stored access token row, as returned by [`Store::get_access_token`]
/// and the subject/client-credentials scans.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessTokenRecord {
    pub token: String,
    pub issuer: String,
    pub token_type: String,
    pub metadata: Metadata,
    pub updated_at: i64,
}

/// A stored refresh token row. Same shape as [`AccessTokenRecord`] minus
/// `token_type` (spec.md §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RefreshTokenRecord {
    pub token: String,
    pub issuer: String,
    pub metadata: Metadata,
    pub updated_at: i64,
}

/// The claims half and ID-token half of one `(issuer, subject)` row.
/// Either half, or both, may be present (spec.md §3).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ClaimsRecord {
    pub id_token: Option<String>,
    pub claims: Option<Metadata>,
    pub updated_at: Option<i64>,
}

/// Storage-layer failures (spec.md §4.1, §7). Converted to [`crate::Error`]
/// at the manager layer via `?`/`From`.
#[derive(Debug, thiserror::Error, Clone)]
pub enum StoreError {
    #[error("more than one result found where at most one was expected")]
    MultipleResultsError,
    #[error("failed to persist record: {reason}")]
    InsertError { reason: String },
}

pub(crate) type StoreResult<T> = std::result::Result<T, StoreError>;

/// Abstract persistence of access tokens, refresh tokens, and
/// claims/ID-token records keyed by `(issuer, subject)` (spec.md §4.1).
///
/// Getters MAY return expired entries; callers are expected to re-check
/// them via [`crate::validity::token_valid`]. Only "not present" yields
/// `Ok(None)`.
#[async_trait::async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    async fn get_access_token(&self, at: &str) -> StoreResult<Option<AccessTokenRecord>>;

    async fn get_access_tokens_for_subject(
        &self,
        iss: &str,
        sub: &str,
    ) -> StoreResult<Vec<AccessTokenRecord>>;

    /// Records with no `sub` only (spec.md §3 Invariant 4).
    async fn get_access_tokens_client_credentials(
        &self,
        iss: &str,
        client_id: &str,
    ) -> StoreResult<Vec<AccessTokenRecord>>;

    async fn put_access_token(
        &self,
        at: &str,
        token_type: &str,
        metadata: Metadata,
        iss: &str,
    ) -> StoreResult<Metadata>;

    async fn delete_access_token(&self, at: &str) -> StoreResult<()>;

    async fn get_refresh_token(&self, rt: &str) -> StoreResult<Option<RefreshTokenRecord>>;

    async fn get_refresh_tokens_for_subject(
        &self,
        iss: &str,
        sub: &str,
    ) -> StoreResult<Vec<RefreshTokenRecord>>;

    async fn get_refresh_tokens_client_credentials(
        &self,
        iss: &str,
        client_id: &str,
    ) -> StoreResult<Vec<RefreshTokenRecord>>;

    async fn put_refresh_token(
        &self,
        rt: &str,
        metadata: Metadata,
        iss: &str,
    ) -> StoreResult<Metadata>;

    async fn delete_refresh_token(&self, rt: &str) -> StoreResult<()>;

    /// `Ok(None)` if no row exists for `(iss, sub)` at all.
    async fn get_claims(&self, iss: &str, sub: &str) -> StoreResult<Option<ClaimsRecord>>;

    /// Preserves the existing `id_token` half of the row (spec.md §4.1).
    async fn put_claims(&self, iss: &str, sub: &str, claims: Metadata) -> StoreResult<()>;

    async fn get_id_token(&self, iss: &str, sub: &str) -> StoreResult<Option<String>>;

    /// Preserves the existing `claims` half of the row (spec.md §4.1).
    async fn put_id_token(&self, iss: &str, sub: &str, id_token: &str) -> StoreResult<()>;
}
