//! Claims / ID-token manager (C6, spec.md §4.6).

use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::access_token::{AccessTokenManager, Subject};
use crate::error::{Error, Result};
use crate::jose::{is_compact_jwe, peek_jws_payload};
use crate::metadata::{get_str, Metadata};
use crate::options::{ClientConf, Options};
use crate::resolver::{merged_server_metadata, EndpointKind, EndpointResolver, HttpJwksResolver};
use crate::store::Store;
use crate::validity::now_unix;
use crate::wire::{fetch_userinfo, UserinfoResponse};

/// Stripped from ID-token payloads before merging with userinfo claims
/// (spec.md §4.6 step 3, GLOSSARY "Technical ID-token claims").
const TECHNICAL_ID_TOKEN_CLAIMS: [&str; 10] = [
    "iss",
    "sub",
    "aud",
    "exp",
    "iat",
    "auth_time",
    "nonce",
    "acr",
    "amr",
    "azp",
];

fn strip_technical_claims(mut claims: Metadata) -> Metadata {
    for key in TECHNICAL_ID_TOKEN_CLAIMS {
        claims.remove(key);
    }
    claims
}

fn overlay(base: &Metadata, top: &Metadata) -> Metadata {
    let mut merged = base.clone();
    for (key, value) in top {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// spec.md §4.6 step 3: strip technical claims from the ID token, then
/// decide precedence by recency when both halves are present.
fn merge(
    id_token: Option<&str>,
    claims: Option<Metadata>,
    claims_updated_at: Option<i64>,
) -> Result<Metadata> {
    let id_token_payload = id_token.map(peek_jws_payload).transpose()?;
    let id_claims = id_token_payload
        .as_ref()
        .and_then(Value::as_object)
        .cloned()
        .map(strip_technical_claims);
    let id_iat = id_token_payload
        .as_ref()
        .and_then(|v| v.get("iat"))
        .and_then(Value::as_i64);

    match (id_claims, claims) {
        (None, None) => Ok(Metadata::new()),
        (None, Some(claims)) => Ok(claims),
        (Some(id_claims), None) => Ok(id_claims),
        (Some(id_claims), Some(claims)) => {
            let id_token_wins = match (id_iat, claims_updated_at) {
                (Some(iat), Some(updated_at)) => iat > updated_at,
                (Some(_), None) => true,
                (None, _) => false,
            };
            Ok(if id_token_wins {
                overlay(&claims, &id_claims)
            } else {
                overlay(&id_claims, &claims)
            })
        }
    }
}

/// Fetch and merge userinfo+ID-token claims, verify JWS, decrypt JWE,
/// persist the latest ID token per subject (spec.md §4.6).
#[derive(Debug)]
pub struct ClaimsManager {
    store: Arc<dyn Store>,
}

impl ClaimsManager {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// `id_token` MUST be a compact JWS. No signature verification here:
    /// by the time a caller hands this crate an ID token from the token
    /// endpoint, it has already verified it per spec.md §4.5 step 4b;
    /// direct third-party registration is a trust-in-caller API.
    ///
    /// # Errors
    /// Returns [`Error::InvalidIDTokenRegistration`] if `id_token` is not
    /// a well-formed compact JWS, or has no `sub` claim.
    pub async fn register_id_token(&self, iss: &Url, id_token: &str) -> Result<()> {
        let payload = peek_jws_payload(id_token)?;
        let sub = payload
            .get("sub")
            .and_then(Value::as_str)
            .ok_or(Error::InvalidIDTokenRegistration)?;
        self.store
            .put_id_token(iss.as_str(), sub, id_token)
            .await
            .map_err(Error::from)
    }

    /// Pure store read.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn get_id_token(&self, iss: &Url, sub: &str) -> Result<Option<String>> {
        self.store
            .get_id_token(iss.as_str(), sub)
            .await
            .map_err(Error::from)
    }

    /// # Errors
    /// Propagates AT acquisition, transport, JOSE and store failures.
    pub async fn get_claims(
        &self,
        iss: &Url,
        sub: &str,
        client_conf: &ClientConf,
        opts: &Options,
    ) -> Result<Metadata> {
        let record = self.store.get_claims(iss.as_str(), sub).await?;
        if let Some(record) = &record {
            if let Some(updated_at) = record.updated_at {
                let age = now_unix() - updated_at;
                if age < opts.min_userinfo_refresh_interval.as_secs() as i64 {
                    return merge(record.id_token.as_deref(), record.claims.clone(), record.updated_at);
                }
            }
        }

        let access_tokens = AccessTokenManager::new(self.store.clone());
        let (at, _token_type) = access_tokens
            .get(iss, &Subject::User(sub.to_string()), client_conf, None, opts)
            .await?;

        let url = EndpointResolver::url(iss, EndpointKind::Userinfo, opts).await?;
        let configured =
            EndpointResolver::http_client(iss, EndpointKind::Userinfo, client_conf, opts).await?;
        let response = fetch_userinfo(&configured, url, &at).await?;

        let claims = match response {
            UserinfoResponse::Json(claims) => claims,
            UserinfoResponse::Jwt(compact) => {
                self.decode_userinfo_jwt(iss, &compact, client_conf, opts)
                    .await?
            }
        };

        self.store
            .put_claims(iss.as_str(), sub, claims.clone())
            .await?;
        let updated_at = now_unix();

        let id_token = self.store.get_id_token(iss.as_str(), sub).await?;
        merge(id_token.as_deref(), Some(claims), Some(updated_at))
    }

    /// Optionally JWE-decrypt, then JWS-verify a userinfo response body
    /// (spec.md §4.6 step 2).
    async fn decode_userinfo_jwt(
        &self,
        iss: &Url,
        compact: &str,
        client_conf: &ClientConf,
        opts: &Options,
    ) -> Result<Metadata> {
        let jws_compact = if is_compact_jwe(compact) {
            let decrypter =
                opts.jwe_decrypter
                    .clone()
                    .ok_or_else(|| Error::MissingClientMetadata {
                        field: "jwe_decrypter".to_string(),
                    })?;
            let alg = client_conf
                .userinfo_encrypted_response_alg
                .as_deref()
                .ok_or_else(|| Error::MissingClientMetadata {
                    field: "userinfo_encrypted_response_alg".to_string(),
                })?;
            let enc = client_conf.userinfo_encrypted_response_enc_or_default();
            let jwks = client_conf
                .private_jwks
                .clone()
                .ok_or_else(|| Error::MissingClientMetadata {
                    field: "private_jwks".to_string(),
                })?;
            decrypter.decrypt(compact, &jwks, alg, enc)?
        } else {
            compact.to_string()
        };

        let verifier = opts
            .jws_verifier
            .clone()
            .ok_or_else(|| Error::MissingClientMetadata {
                field: "jws_verifier".to_string(),
            })?;
        let alg = client_conf
            .userinfo_signed_response_alg
            .as_deref()
            .ok_or_else(|| Error::MissingClientMetadata {
                field: "userinfo_signed_response_alg".to_string(),
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
            .unwrap_or_else(|| Arc::new(HttpJwksResolver::default()));
        let jwks = resolver.resolve(&jwks_uri).await?;

        let payload = verifier.verify(&jws_compact, &jwks, alg)?;
        payload
            .as_object()
            .cloned()
            .ok_or_else(|| Error::UserinfoEndpointVerificationFailure {
                reason: "verified payload is not a JSON object".to_string(),
            })
    }
}
