//! AccessToken manager (C4, spec.md §4.4).

use std::collections::BTreeSet;
use std::sync::Arc;

use url::Url;

use crate::digest::token_digest;
use crate::error::{Error, Result};
use crate::metadata::{normalize_scope, scope_set, Metadata};
use crate::options::{ClientConf, Options};
use crate::refresh_token::RefreshTokenManager;
use crate::resolver::{EndpointKind, EndpointResolver};
use crate::store::Store;
use crate::validity::{now_unix, token_valid};
use crate::wire::perform_introspection;

/// Who an access/refresh token belongs to: either an end-user subject, or
/// "the client itself" for a client-credentials-flow token, which is
/// looked up by `client_id` and has no `sub` (spec.md §3 Invariant 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    User(String),
    ClientCredentials,
}

/// Register, introspect (freshness-gated), select-or-acquire, delete,
/// revoke (spec.md §4.4).
#[derive(Debug)]
pub struct AccessTokenManager {
    store: Arc<dyn Store>,
}

impl AccessTokenManager {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Propagates introspection/store failures.
    pub async fn register(
        &self,
        at: &str,
        token_type: &str,
        mut metadata: Metadata,
        iss: &Url,
        client_conf: &ClientConf,
        opts: &Options,
    ) -> Result<Metadata> {
        let metadata = if opts.auto_introspect || metadata.get("sub").is_none() {
            self.introspect(at, iss, client_conf, opts).await?
        } else {
            normalize_scope(&mut metadata);
            metadata
        };
        self.store
            .put_access_token(at, token_type, metadata, iss.as_str())
            .await
            .map_err(Error::from)
    }

    /// Returns cached metadata without a network call if the stored
    /// record for `at` was updated less than `opts.min_introspect_interval`
    /// ago.
    ///
    /// # Errors
    /// Propagates transport and endpoint-resolution failures.
    pub async fn introspect(
        &self,
        at: &str,
        iss: &Url,
        client_conf: &ClientConf,
        opts: &Options,
    ) -> Result<Metadata> {
        if let Some(record) = self.store.get_access_token(at).await? {
            let age = now_unix() - record.updated_at;
            if age < opts.min_introspect_interval.as_secs() as i64 {
                return Ok(record.metadata);
            }
        }

        let url = EndpointResolver::url(iss, EndpointKind::Introspection, opts).await?;
        let configured =
            EndpointResolver::http_client(iss, EndpointKind::Introspection, client_conf, opts)
                .await?;

        match perform_introspection(&configured, url, at, "access_token", client_conf).await {
            Ok(metadata) => Ok(metadata),
            Err(e) => {
                tracing::warn!(
                    token_digest = %token_digest(at),
                    error = %e,
                    "access token introspection failed"
                );
                Err(e)
            }
        }
    }

    /// Select a cached, valid access token for `subject`, or fall through
    /// to [`RefreshTokenManager::request_access_token`].
    ///
    /// # Errors
    /// Returns [`Error::NoSuitableAccessTokenFound`] if no cached token
    /// matches and the refresh fallback also fails.
    pub async fn get(
        &self,
        iss: &Url,
        subject: &Subject,
        client_conf: &ClientConf,
        requested_scopes: Option<&[String]>,
        opts: &Options,
    ) -> Result<(String, String)> {
        let candidates = match subject {
            Subject::User(sub) => {
                self.store
                    .get_access_tokens_for_subject(iss.as_str(), sub)
                    .await?
            }
            Subject::ClientCredentials => {
                self.store
                    .get_access_tokens_client_credentials(iss.as_str(), &client_conf.client_id)
                    .await?
            }
        };

        let now = now_unix();
        let requested: Option<BTreeSet<String>> =
            requested_scopes.map(|scopes| scopes.iter().cloned().collect());

        for candidate in candidates {
            if !token_valid(&candidate.metadata, now) {
                continue;
            }
            if let Some(requested) = &requested {
                if &scope_set(&candidate.metadata) != requested {
                    continue;
                }
            }
            return Ok((candidate.token, candidate.token_type));
        }

        let refresh_tokens = RefreshTokenManager::new(self.store.clone());
        refresh_tokens
            .request_access_token(iss, subject, client_conf, requested_scopes, opts)
            .await
            .map(|(at, token_type, _metadata)| (at, token_type))
            .map_err(|_| Error::NoSuitableAccessTokenFound)
    }

    /// Deletes `at` locally; if `opts.revoke_on_delete`, spawns an
    /// unobserved background [`Self::revoke`]. Returns as soon as the
    /// local delete completes.
    ///
    /// # Errors
    /// Propagates the local store deletion failure only; the background
    /// revoke's outcome is never observed here.
    pub async fn delete(
        &self,
        at: &str,
        iss: &Url,
        client_conf: &ClientConf,
        opts: &Options,
    ) -> Result<()> {
        self.store.delete_access_token(at).await?;
        if opts.revoke_on_delete {
            let at = at.to_string();
            let iss = iss.clone();
            let client_conf = client_conf.clone();
            let opts = opts.clone();
            let store = self.store.clone();
            tokio::spawn(async move {
                let manager = AccessTokenManager::new(store);
                if let Err(e) = manager.revoke(&at, &iss, &client_conf, &opts).await {
                    tracing::warn!(
                        token_digest = %token_digest(&at),
                        error = %e,
                        "background access token revocation failed"
                    );
                }
            });
        }
        Ok(())
    }

    /// Fan out [`Self::delete`] over every token matching `subject`,
    /// concurrently.
    ///
    /// # Errors
    /// Returns `Ok(())` if every deletion succeeded, otherwise propagates
    /// the first encountered error; it does not distinguish a total
    /// failure from a partial one.
    pub async fn delete_all(
        &self,
        iss: &Url,
        subject: &Subject,
        client_conf: &ClientConf,
        opts: &Options,
    ) -> Result<()> {
        let candidates = match subject {
            Subject::User(sub) => {
                self.store
                    .get_access_tokens_for_subject(iss.as_str(), sub)
                    .await?
            }
            Subject::ClientCredentials => {
                self.store
                    .get_access_tokens_client_credentials(iss.as_str(), &client_conf.client_id)
                    .await?
            }
        };

        let results = futures::future::join_all(candidates.into_iter().map(|candidate| {
            let iss = iss.clone();
            let client_conf = client_conf.clone();
            let opts = opts.clone();
            async move { self.delete(&candidate.token, &iss, &client_conf, &opts).await }
        }))
        .await;

        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    /// RFC 7009. 200 is the only success status.
    ///
    /// # Errors
    /// [`Error::HTTPStatusError`] for non-200, [`Error::HTTPRequestError`]
    /// for transport failures.
    pub async fn revoke(
        &self,
        at: &str,
        iss: &Url,
        client_conf: &ClientConf,
        opts: &Options,
    ) -> Result<()> {
        let url = EndpointResolver::url(iss, EndpointKind::Revocation, opts).await?;
        let configured =
            EndpointResolver::http_client(iss, EndpointKind::Revocation, client_conf, opts)
                .await?;
        crate::wire::perform_revocation(&configured, url, at, "access_token", client_conf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use serde_json::{json, Map};

    async fn manager() -> AccessTokenManager {
        let store = LocalStore::start(Default::default()).await.unwrap();
        AccessTokenManager::new(Arc::new(store))
    }

    fn client_conf() -> ClientConf {
        ClientConf::builder()
            .client_id("client-1".to_string())
            .client_secret("secret".to_string())
            .build()
    }

    #[tokio::test]
    async fn get_returns_exact_scope_match_only() {
        let manager = manager().await;
        let iss = Url::parse("https://idp.example").unwrap();

        manager
            .store
            .put_access_token(
                "at-ab",
                "Bearer",
                Map::from_iter([
                    ("sub".to_string(), json!("alice")),
                    ("scope".to_string(), json!(["a", "b"])),
                ]),
                iss.as_str(),
            )
            .await
            .unwrap();
        manager
            .store
            .put_access_token(
                "at-a",
                "Bearer",
                Map::from_iter([
                    ("sub".to_string(), json!("alice")),
                    ("scope".to_string(), json!(["a"])),
                ]),
                iss.as_str(),
            )
            .await
            .unwrap();

        let (at, _) = manager
            .get(
                &iss,
                &Subject::User("alice".to_string()),
                &client_conf(),
                Some(&["a".to_string(), "b".to_string()]),
                &Options::default(),
            )
            .await
            .unwrap();
        assert_eq!(at, "at-ab");
    }

    #[tokio::test]
    async fn get_skips_expired_candidates() {
        let manager = manager().await;
        let iss = Url::parse("https://idp.example").unwrap();
        let now = now_unix();

        manager
            .store
            .put_access_token(
                "at-expired",
                "Bearer",
                Map::from_iter([
                    ("sub".to_string(), json!("alice")),
                    ("exp".to_string(), json!(now - 10)),
                ]),
                iss.as_str(),
            )
            .await
            .unwrap();

        let err = manager
            .get(
                &iss,
                &Subject::User("alice".to_string()),
                &client_conf(),
                None,
                &Options::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuitableAccessTokenFound));
    }
}
