//! Default [`Store`] implementation (C2, spec.md §4.2): access tokens in
//! a concurrent in-memory table (`dashmap`), refresh tokens and claims in
//! a durable on-disk table (`sled`), with a periodic eviction sweep.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::metadata::{get_i64, Metadata};
use crate::validity::now_unix;

use super::{AccessTokenRecord, ClaimsRecord, RefreshTokenRecord, Store, StoreError, StoreResult};

fn claims_key(iss: &str, sub: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(iss.len() + sub.len() + 1);
    key.extend_from_slice(iss.as_bytes());
    key.push(0);
    key.extend_from_slice(sub.as_bytes());
    key
}

fn storage_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::InsertError {
        reason: e.to_string(),
    }
}

/// Construction options for [`LocalStore::start`].
#[derive(Debug, Clone)]
pub struct LocalStoreOptions {
    /// On-disk path for the durable tables. `None` opens an ephemeral
    /// `sled::Config::temporary` store, suitable for tests.
    pub path: Option<PathBuf>,
    /// Eviction sweep period. Default 15 seconds (spec.md §4.2).
    pub cleanup_interval: Duration,
}

impl Default for LocalStoreOptions {
    fn default() -> Self {
        Self {
            path: None,
            cleanup_interval: Duration::from_secs(15),
        }
    }
}

/// The default [`Store`]. Requires a supervised lifecycle: [`LocalStore::start`]
/// opens the tables and spawns the eviction sweep; [`LocalStore::stop`]
/// aborts the sweep and flushes the durable tables (spec.md §5).
#[derive(Debug)]
pub struct LocalStore {
    access_tokens: Arc<DashMap<String, AccessTokenRecord>>,
    refresh_tokens: sled::Tree,
    claims: sled::Tree,
    db: sled::Db,
    eviction_task: Option<tokio::task::JoinHandle<()>>,
}

impl LocalStore {
    /// # Errors
    /// Returns [`StoreError::InsertError`] if the on-disk tables cannot be
    /// opened.
    pub async fn start(opts: LocalStoreOptions) -> StoreResult<Self> {
        let db = match &opts.path {
            Some(path) => sled::open(path).map_err(storage_err)?,
            None => sled::Config::new()
                .temporary(true)
                .open()
                .map_err(storage_err)?,
        };
        let refresh_tokens = db.open_tree("refresh_tokens").map_err(storage_err)?;
        let claims = db.open_tree("claims").map_err(storage_err)?;
        let access_tokens: Arc<DashMap<String, AccessTokenRecord>> = Arc::new(DashMap::new());

        let eviction_task = tokio::spawn(eviction_loop(
            access_tokens.clone(),
            refresh_tokens.clone(),
            opts.cleanup_interval,
        ));

        Ok(Self {
            access_tokens,
            refresh_tokens,
            claims,
            db,
            eviction_task: Some(eviction_task),
        })
    }

    /// Aborts the eviction sweep and flushes the durable tables.
    ///
    /// # Errors
    /// Returns [`StoreError::InsertError`] if the final flush fails.
    pub async fn stop(mut self) -> StoreResult<()> {
        if let Some(task) = self.eviction_task.take() {
            task.abort();
        }
        self.db.flush_async().await.map_err(storage_err)?;
        Ok(())
    }
}

async fn eviction_loop(
    access_tokens: Arc<DashMap<String, AccessTokenRecord>>,
    refresh_tokens: sled::Tree,
    cleanup_interval: Duration,
) {
    let mut ticker = tokio::time::interval(cleanup_interval);
    loop {
        ticker.tick().await;
        let now = now_unix();
        let mut reaped = 0usize;

        access_tokens.retain(|_, record| {
            let keep = get_i64(&record.metadata, "exp").map_or(true, |exp| exp >= now);
            if !keep {
                reaped += 1;
            }
            keep
        });

        let mut expired_keys = Vec::new();
        for item in refresh_tokens.iter() {
            let Ok((key, value)) = item else { continue };
            let Ok(record) = serde_json::from_slice::<RefreshTokenRecord>(&value) else {
                continue;
            };
            if get_i64(&record.metadata, "exp").is_some_and(|exp| exp < now) {
                expired_keys.push(key);
            }
        }
        for key in expired_keys {
            if refresh_tokens.remove(key).is_ok() {
                reaped += 1;
            }
        }

        tracing::debug!(reaped, "eviction sweep complete");
    }
}

#[async_trait::async_trait]
impl Store for LocalStore {
    async fn get_access_token(&self, at: &str) -> StoreResult<Option<AccessTokenRecord>> {
        Ok(self.access_tokens.get(at).map(|r| r.clone()))
    }

    async fn get_access_tokens_for_subject(
        &self,
        iss: &str,
        sub: &str,
    ) -> StoreResult<Vec<AccessTokenRecord>> {
        Ok(self
            .access_tokens
            .iter()
            .map(|r| r.clone())
            .filter(|r| r.issuer == iss && r.metadata.get("sub").and_then(|v| v.as_str()) == Some(sub))
            .collect())
    }

    async fn get_access_tokens_client_credentials(
        &self,
        iss: &str,
        client_id: &str,
    ) -> StoreResult<Vec<AccessTokenRecord>> {
        Ok(self
            .access_tokens
            .iter()
            .map(|r| r.clone())
            .filter(|r| {
                r.issuer == iss
                    && !r.metadata.contains_key("sub")
                    && r.metadata.get("client_id").and_then(|v| v.as_str()) == Some(client_id)
            })
            .collect())
    }

    async fn put_access_token(
        &self,
        at: &str,
        token_type: &str,
        metadata: Metadata,
        iss: &str,
    ) -> StoreResult<Metadata> {
        let record = AccessTokenRecord {
            token: at.to_string(),
            issuer: iss.to_string(),
            token_type: token_type.to_string(),
            metadata: metadata.clone(),
            updated_at: now_unix(),
        };
        self.access_tokens.insert(at.to_string(), record);
        Ok(metadata)
    }

    async fn delete_access_token(&self, at: &str) -> StoreResult<()> {
        self.access_tokens.remove(at);
        Ok(())
    }

    async fn get_refresh_token(&self, rt: &str) -> StoreResult<Option<RefreshTokenRecord>> {
        let Some(bytes) = self.refresh_tokens.get(rt).map_err(storage_err)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes).map_err(storage_err)?))
    }

    async fn get_refresh_tokens_for_subject(
        &self,
        iss: &str,
        sub: &str,
    ) -> StoreResult<Vec<RefreshTokenRecord>> {
        let mut out = Vec::new();
        for item in self.refresh_tokens.iter() {
            let (_, value) = item.map_err(storage_err)?;
            let record: RefreshTokenRecord = serde_json::from_slice(&value).map_err(storage_err)?;
            if record.issuer == iss
                && record.metadata.get("sub").and_then(|v| v.as_str()) == Some(sub)
            {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn get_refresh_tokens_client_credentials(
        &self,
        iss: &str,
        client_id: &str,
    ) -> StoreResult<Vec<RefreshTokenRecord>> {
        let mut out = Vec::new();
        for item in self.refresh_tokens.iter() {
            let (_, value) = item.map_err(storage_err)?;
            let record: RefreshTokenRecord = serde_json::from_slice(&value).map_err(storage_err)?;
            if record.issuer == iss
                && !record.metadata.contains_key("sub")
                && record.metadata.get("client_id").and_then(|v| v.as_str()) == Some(client_id)
            {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn put_refresh_token(
        &self,
        rt: &str,
        metadata: Metadata,
        iss: &str,
    ) -> StoreResult<Metadata> {
        let record = RefreshTokenRecord {
            token: rt.to_string(),
            issuer: iss.to_string(),
            metadata: metadata.clone(),
            updated_at: now_unix(),
        };
        let bytes = serde_json::to_vec(&record).map_err(storage_err)?;
        self.refresh_tokens
            .insert(rt, bytes)
            .map_err(storage_err)?;
        Ok(metadata)
    }

    async fn delete_refresh_token(&self, rt: &str) -> StoreResult<()> {
        self.refresh_tokens.remove(rt).map_err(storage_err)?;
        Ok(())
    }

    async fn get_claims(&self, iss: &str, sub: &str) -> StoreResult<Option<ClaimsRecord>> {
        let key = claims_key(iss, sub);
        let Some(bytes) = self.claims.get(key).map_err(storage_err)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes).map_err(storage_err)?))
    }

    async fn put_claims(&self, iss: &str, sub: &str, claims: Metadata) -> StoreResult<()> {
        let key = claims_key(iss, sub);
        let mut record = match self.claims.get(&key).map_err(storage_err)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(storage_err)?,
            None => ClaimsRecord::default(),
        };
        record.claims = Some(claims);
        record.updated_at = Some(now_unix());
        let bytes = serde_json::to_vec(&record).map_err(storage_err)?;
        self.claims.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }

    async fn get_id_token(&self, iss: &str, sub: &str) -> StoreResult<Option<String>> {
        let key = claims_key(iss, sub);
        let Some(bytes) = self.claims.get(key).map_err(storage_err)? else {
            return Ok(None);
        };
        let record: ClaimsRecord = serde_json::from_slice(&bytes).map_err(storage_err)?;
        Ok(record.id_token)
    }

    async fn put_id_token(&self, iss: &str, sub: &str, id_token: &str) -> StoreResult<()> {
        let key = claims_key(iss, sub);
        let mut record = match self.claims.get(&key).map_err(storage_err)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(storage_err)?,
            None => ClaimsRecord::default(),
        };
        record.id_token = Some(id_token.to_string());
        let bytes = serde_json::to_vec(&record).map_err(storage_err)?;
        self.claims.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    async fn test_store() -> LocalStore {
        LocalStore::start(LocalStoreOptions::default()).await.unwrap()
    }

    #[tokio::test]
    async fn put_then_get_access_token_round_trips() {
        let store = test_store().await;
        let mut metadata = Map::new();
        metadata.insert("sub".to_string(), json!("alice"));
        store
            .put_access_token("at-1", "Bearer", metadata.clone(), "https://idp.example")
            .await
            .unwrap();
        let record = store.get_access_token("at-1").await.unwrap().unwrap();
        assert_eq!(record.token_type, "Bearer");
        assert_eq!(record.metadata, metadata);
    }

    #[tokio::test]
    async fn client_credentials_lookup_excludes_subject_rows() {
        let store = test_store().await;
        let mut with_sub = Map::new();
        with_sub.insert("sub".to_string(), json!("alice"));
        with_sub.insert("client_id".to_string(), json!("client-1"));
        let mut without_sub = Map::new();
        without_sub.insert("client_id".to_string(), json!("client-1"));

        store
            .put_access_token("at-sub", "Bearer", with_sub, "https://idp.example")
            .await
            .unwrap();
        store
            .put_access_token("at-cc", "Bearer", without_sub, "https://idp.example")
            .await
            .unwrap();

        let rows = store
            .get_access_tokens_client_credentials("https://idp.example", "client-1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].token, "at-cc");
    }

    #[tokio::test]
    async fn put_claims_preserves_id_token() {
        let store = test_store().await;
        store
            .put_id_token("https://idp.example", "alice", "header.payload.sig")
            .await
            .unwrap();
        store
            .put_claims(
                "https://idp.example",
                "alice",
                Map::from_iter([("email".to_string(), json!("alice@example.com"))]),
            )
            .await
            .unwrap();
        let record = store
            .get_claims("https://idp.example", "alice")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.id_token.as_deref(), Some("header.payload.sig"));
        assert!(record.claims.is_some());
    }

    #[tokio::test]
    async fn put_id_token_preserves_claims() {
        let store = test_store().await;
        store
            .put_claims(
                "https://idp.example",
                "alice",
                Map::from_iter([("email".to_string(), json!("alice@example.com"))]),
            )
            .await
            .unwrap();
        store
            .put_id_token("https://idp.example", "alice", "header.payload.sig")
            .await
            .unwrap();
        let record = store
            .get_claims("https://idp.example", "alice")
            .await
            .unwrap()
            .unwrap();
        assert!(record.claims.is_some());
        assert_eq!(record.id_token.as_deref(), Some("header.payload.sig"));
    }

    #[tokio::test]
    async fn eviction_sweep_removes_only_expired_rows() {
        let store = LocalStore::start(LocalStoreOptions {
            path: None,
            cleanup_interval: Duration::from_millis(20),
        })
        .await
        .unwrap();

        let now = now_unix();
        store
            .put_access_token(
                "at-expired",
                "Bearer",
                Map::from_iter([("exp".to_string(), json!(now - 100))]),
                "https://idp.example",
            )
            .await
            .unwrap();
        store
            .put_access_token(
                "at-fresh",
                "Bearer",
                Map::from_iter([("exp".to_string(), json!(now + 3600))]),
                "https://idp.example",
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(store.get_access_token("at-expired").await.unwrap().is_none());
        assert!(store.get_access_token("at-fresh").await.unwrap().is_some());
    }
}
