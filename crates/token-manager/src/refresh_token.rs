//! RefreshToken manager (C5, spec.md §4.5).

use std::collections::BTreeSet;
use std::sync::Arc;

use url::Url;

use crate::access_token::{AccessTokenManager, Subject};
use crate::claims::ClaimsManager;
use crate::digest::token_digest;
use crate::error::{Error, Result};
use crate::jose::peek_jws_header;
use crate::metadata::{drop_nulls, get_str, normalize_scope, scope_set, scope_to_wire, Metadata};
use crate::options::{ClientConf, Options};
use crate::resolver::{merged_server_metadata, EndpointKind, EndpointResolver};
use crate::store::Store;
use crate::validity::now_unix;
use crate::wire::{perform_introspection, perform_refresh_grant};

/// Fields projected from a refresh token's metadata onto the access
/// token minted from it (spec.md §4.5 step 4c).
const PROJECTED_FIELDS: [&str; 5] = ["client_id", "username", "sub", "aud", "iss"];

/// Fields a rotated refresh token inherits from the one it replaces
/// (spec.md §4.5 step 4a).
const ROTATED_RT_FIELDS: [&str; 6] = ["client_id", "username", "sub", "aud", "iss", "scope"];

/// Mirrors [`AccessTokenManager`] for register/introspect/delete/
/// delete_all/revoke, plus [`Self::request_access_token`] (spec.md §4.5).
#[derive(Debug)]
pub struct RefreshTokenManager {
    store: Arc<dyn Store>,
}

impl RefreshTokenManager {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Propagates introspection/store failures.
    pub async fn register(
        &self,
        rt: &str,
        mut metadata: Metadata,
        iss: &Url,
        client_conf: &ClientConf,
        opts: &Options,
    ) -> Result<Metadata> {
        let metadata = if opts.auto_introspect || metadata.get("sub").is_none() {
            self.introspect(rt, iss, client_conf, opts).await?
        } else {
            normalize_scope(&mut metadata);
            metadata
        };
        self.store
            .put_refresh_token(rt, metadata, iss.as_str())
            .await
            .map_err(Error::from)
    }

    /// # Errors
    /// Propagates transport and endpoint-resolution failures.
    pub async fn introspect(
        &self,
        rt: &str,
        iss: &Url,
        client_conf: &ClientConf,
        opts: &Options,
    ) -> Result<Metadata> {
        if let Some(record) = self.store.get_refresh_token(rt).await? {
            let age = now_unix() - record.updated_at;
            if age < opts.min_introspect_interval.as_secs() as i64 {
                return Ok(record.metadata);
            }
        }

        let url = EndpointResolver::url(iss, EndpointKind::Introspection, opts).await?;
        let configured =
            EndpointResolver::http_client(iss, EndpointKind::Introspection, client_conf, opts)
                .await?;

        match perform_introspection(&configured, url, rt, "refresh_token", client_conf).await {
            Ok(metadata) => Ok(metadata),
            Err(e) => {
                tracing::warn!(
                    token_digest = %token_digest(rt),
                    error = %e,
                    "refresh token introspection failed"
                );
                Err(e)
            }
        }
    }

    /// # Errors
    /// Propagates the local store deletion failure only.
    pub async fn delete(
        &self,
        rt: &str,
        iss: &Url,
        client_conf: &ClientConf,
        opts: &Options,
    ) -> Result<()> {
        self.store.delete_refresh_token(rt).await?;
        if opts.revoke_on_delete {
            let rt = rt.to_string();
            let iss = iss.clone();
            let client_conf = client_conf.clone();
            let opts = opts.clone();
            let store = self.store.clone();
            tokio::spawn(async move {
                let manager = RefreshTokenManager::new(store);
                if let Err(e) = manager.revoke(&rt, &iss, &client_conf, &opts).await {
                    tracing::warn!(
                        token_digest = %token_digest(&rt),
                        error = %e,
                        "background refresh token revocation failed"
                    );
                }
            });
        }
        Ok(())
    }

    /// # Errors
    /// Returns the first encountered error if any fan-out deletion fails.
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
                    .get_refresh_tokens_for_subject(iss.as_str(), sub)
                    .await?
            }
            Subject::ClientCredentials => {
                self.store
                    .get_refresh_tokens_client_credentials(iss.as_str(), &client_conf.client_id)
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

    /// # Errors
    /// [`Error::HTTPStatusError`] for non-200, [`Error::HTTPRequestError`]
    /// for transport failures.
    pub async fn revoke(
        &self,
        rt: &str,
        iss: &Url,
        client_conf: &ClientConf,
        opts: &Options,
    ) -> Result<()> {
        let url = EndpointResolver::url(iss, EndpointKind::Revocation, opts).await?;
        let configured =
            EndpointResolver::http_client(iss, EndpointKind::Revocation, client_conf, opts)
                .await?;
        crate::wire::perform_revocation(&configured, url, rt, "refresh_token", client_conf).await
    }

    /// Exchange a suitable stored refresh token for a new access token
    /// (spec.md §4.5 `request_access_token`).
    ///
    /// # Errors
    /// [`Error::NoSuitableRefreshTokenFound`] if no stored RT's scope set
    /// is a superset of `scopes`; [`Error::IllegalTokenEndpointResponse`]
    /// for a 200 response missing `access_token`/`token_type`; propagates
    /// HTTP and ID-token-verification failures, which are fatal to the
    /// whole call (spec.md §4.5 step 4b).
    pub async fn request_access_token(
        &self,
        iss: &Url,
        subject: &Subject,
        client_conf: &ClientConf,
        scopes: Option<&[String]>,
        opts: &Options,
    ) -> Result<(String, String, Metadata)> {
        let candidates = match subject {
            Subject::User(sub) => {
                self.store
                    .get_refresh_tokens_for_subject(iss.as_str(), sub)
                    .await?
            }
            Subject::ClientCredentials => {
                self.store
                    .get_refresh_tokens_client_credentials(iss.as_str(), &client_conf.client_id)
                    .await?
            }
        };

        let requested: BTreeSet<String> = scopes
            .unwrap_or(&[])
            .iter()
            .cloned()
            .collect();

        let consumed = candidates
            .into_iter()
            .find(|candidate| {
                requested.is_empty() || scope_set(&candidate.metadata).is_superset(&requested)
            })
            .ok_or(Error::NoSuitableRefreshTokenFound)?;

        let url = EndpointResolver::url(iss, EndpointKind::Token, opts).await?;
        let configured =
            EndpointResolver::http_client(iss, EndpointKind::Token, client_conf, opts).await?;

        let scope_list: Vec<String> = scopes.map(<[String]>::to_vec).unwrap_or_default();
        let response =
            perform_refresh_grant(&configured, url, &consumed.token, &scope_list, client_conf)
                .await?;

        let (Some(access_token), Some(token_type)) =
            (response.access_token.clone(), response.token_type.clone())
        else {
            return Err(Error::IllegalTokenEndpointResponse);
        };

        if let Some(rotated) = &response.refresh_token {
            self.delete(&consumed.token, iss, client_conf, opts).await?;
            let mut rotated_metadata = Metadata::new();
            for field in ROTATED_RT_FIELDS {
                if let Some(value) = consumed.metadata.get(field) {
                    rotated_metadata.insert(field.to_string(), value.clone());
                }
            }
            self.register(rotated, rotated_metadata, iss, client_conf, opts)
                .await?;
        }

        if let Some(id_token) = &response.id_token {
            self.verify_id_token(iss, id_token, opts).await?;
            ClaimsManager::new(self.store.clone())
                .register_id_token(iss, id_token)
                .await?;
        }

        let mut at_metadata = Metadata::new();
        for field in PROJECTED_FIELDS {
            if let Some(value) = consumed.metadata.get(field) {
                at_metadata.insert((*field).to_string(), value.clone());
            }
        }
        if let Some(expires_in) = response.expires_in {
            at_metadata.insert(
                "exp".to_string(),
                serde_json::json!(now_unix() + expires_in),
            );
        }
        // spec.md §4.5 step 4c: response.scope (normalized) if present,
        // else the originally-requested scopes. When the caller requested
        // no particular scopes (any suitable RT qualifies), "originally
        // requested" falls back to whatever scope the consumed RT itself
        // carried (spec.md §8 scenario S1 is explicit that a scopeless
        // `get()` call against a scoped RT yields an AT with that same
        // scope, not a scopeless one).
        let projected_scope = response.scope.clone().or_else(|| {
            if scopes.is_some() {
                scope_to_wire(&scope_list)
            } else {
                scope_to_wire(&scope_set(&consumed.metadata).into_iter().collect::<Vec<_>>())
            }
        });
        if let Some(scope) = projected_scope {
            at_metadata.insert("scope".to_string(), serde_json::json!(scope));
            normalize_scope(&mut at_metadata);
        }
        drop_nulls(&mut at_metadata);

        let final_metadata = AccessTokenManager::new(self.store.clone())
            .register(
                &access_token,
                &token_type,
                at_metadata,
                iss,
                client_conf,
                opts,
            )
            .await?;

        Ok((access_token, token_type, final_metadata))
    }

    async fn verify_id_token(&self, iss: &Url, id_token: &str, opts: &Options) -> Result<()> {
        let verifier = opts
            .jws_verifier
            .clone()
            .ok_or_else(|| Error::MissingClientMetadata {
                field: "jws_verifier".to_string(),
            })?;

        let metadata = merged_server_metadata(iss, opts).await;
        let jwks_uri = get_str(&metadata, "jwks_uri").ok_or_else(|| Error::MissingServerMetadata {
            field: "jwks_uri".to_string(),
        })?;
        let jwks_uri = Url::parse(jwks_uri).map_err(|e| Error::MissingServerMetadata {
            field: format!("jwks_uri ({e})"),
        })?;

        let resolver = opts
            .jwks_resolver
            .clone()
            .unwrap_or_else(|| Arc::new(crate::resolver::HttpJwksResolver::default()));
        let jwks = resolver.resolve(&jwks_uri).await?;

        let header = peek_jws_header(id_token)?;
        let alg = header.get("alg").and_then(|v| v.as_str()).unwrap_or("RS256");

        verifier.verify(id_token, &jwks, alg)?;
        Ok(())
    }
}
