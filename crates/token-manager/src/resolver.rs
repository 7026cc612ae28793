//! Endpoint resolver (C3, spec.md §4.3).

use std::sync::Arc;

use url::Url;

use crate::client_auth::{self, ClientAuthenticator, DEFAULT_METHOD};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::middleware::RequestMiddleware;
use crate::options::{ClientConf, Options};

/// The four RFC-standard endpoints this crate resolves and calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Token,
    Introspection,
    Revocation,
    Userinfo,
}

impl EndpointKind {
    fn metadata_field(self) -> &'static str {
        match self {
            EndpointKind::Token => "token_endpoint",
            EndpointKind::Introspection => "introspection_endpoint",
            EndpointKind::Revocation => "revocation_endpoint",
            EndpointKind::Userinfo => "userinfo_endpoint",
        }
    }

    #[must_use]
    pub fn endpoint(self) -> crate::error::Endpoint {
        match self {
            EndpointKind::Token => crate::error::Endpoint::Token,
            EndpointKind::Introspection => crate::error::Endpoint::Introspection,
            EndpointKind::Revocation => crate::error::Endpoint::Revocation,
            EndpointKind::Userinfo => crate::error::Endpoint::Userinfo,
        }
    }
}

/// Resolves `issuer -> server metadata document`. The real
/// "authorization-server metadata updater" described in spec.md §1 is out
/// of this crate's scope; this trait is the seam a caller plugs a
/// caching/refreshing implementation into. [`HttpServerMetadataResolver`]
/// is a minimal default suitable for simple deployments and tests.
#[async_trait::async_trait]
pub trait ServerMetadataResolver: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// Transient fetch failures should be returned as an [`Error`]; the
    /// caller (this crate's [`EndpointResolver::url`]) falls back to
    /// `opts.server_metadata` on failure rather than propagating it.
    async fn resolve(&self, iss: &Url) -> Result<Metadata>;
}

/// Fetches `{iss}/.well-known/oauth-authorization-server`, falling back to
/// `{iss}/.well-known/openid-configuration` if the first returns a
/// non-success status.
#[derive(Debug, Clone, Default)]
pub struct HttpServerMetadataResolver {
    client: reqwest::Client,
}

impl HttpServerMetadataResolver {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, url: Url) -> Result<Metadata> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Arc::new)
            .map_err(Error::from)?;
        if !response.status().is_success() {
            return Err(Error::http_status(
                crate::error::Endpoint::Token,
                response.status(),
            ));
        }
        response
            .json::<Metadata>()
            .await
            .map_err(Arc::new)
            .map_err(Error::from)
    }
}

#[async_trait::async_trait]
impl ServerMetadataResolver for HttpServerMetadataResolver {
    async fn resolve(&self, iss: &Url) -> Result<Metadata> {
        let oauth_well_known = iss
            .join(".well-known/oauth-authorization-server")
            .map_err(|e| Error::http_request(crate::error::Endpoint::Token, e))?;
        if let Ok(metadata) = self.fetch(oauth_well_known).await {
            return Ok(metadata);
        }
        let oidc_well_known = iss
            .join(".well-known/openid-configuration")
            .map_err(|e| Error::http_request(crate::error::Endpoint::Token, e))?;
        self.fetch(oidc_well_known).await
    }
}

/// Resolves `jwks_uri -> JWK set`. Like [`ServerMetadataResolver`], this is
/// the seam for the real "signing-key set updater" spec.md §1 declares out
/// of scope (callers needing caching/rotation plug in their own impl);
/// [`HttpJwksResolver`] is a minimal default for simple deployments.
#[async_trait::async_trait]
pub trait JwksResolver: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// Returns an [`Error`] on a failed or non-JSON fetch.
    async fn resolve(&self, jwks_uri: &Url) -> Result<serde_json::Value>;
}

/// Fetches and parses `jwks_uri` directly; no caching, no key rotation.
#[derive(Debug, Clone, Default)]
pub struct HttpJwksResolver {
    client: reqwest::Client,
}

impl HttpJwksResolver {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl JwksResolver for HttpJwksResolver {
    async fn resolve(&self, jwks_uri: &Url) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(jwks_uri.clone())
            .send()
            .await
            .map_err(Arc::new)
            .map_err(Error::from)?;
        if !response.status().is_success() {
            return Err(Error::http_status(
                crate::error::Endpoint::Token,
                response.status(),
            ));
        }
        response
            .json()
            .await
            .map_err(Arc::new)
            .map_err(Error::from)
    }
}

/// A [`ServerMetadataResolver`] that never calls out over the network:
/// it always resolves to a fixed metadata document (or an empty one).
/// Handy for tests and for deployments that provision server metadata
/// entirely through `opts.server_metadata` / `ClientConf`.
#[derive(Debug, Clone, Default)]
pub struct StaticServerMetadataResolver {
    metadata: Metadata,
}

impl StaticServerMetadataResolver {
    #[must_use]
    pub fn new(metadata: Metadata) -> Self {
        Self { metadata }
    }
}

#[async_trait::async_trait]
impl ServerMetadataResolver for StaticServerMetadataResolver {
    async fn resolve(&self, _iss: &Url) -> Result<Metadata> {
        Ok(self.metadata.clone())
    }
}

/// Merge the remote discovery document with `opts.server_metadata`,
/// the latter taking precedence on conflict, per spec.md §4.3.
pub(crate) async fn merged_server_metadata(iss: &Url, opts: &Options) -> Metadata {
    let resolver = opts
        .server_metadata_resolver
        .clone()
        .unwrap_or_else(|| Arc::new(HttpServerMetadataResolver::default()));

    let mut merged = match resolver.resolve(iss).await {
        Ok(remote) => remote,
        Err(e) => {
            tracing::warn!(
                issuer = %iss,
                error = %e,
                "failed to fetch server metadata, falling back to statically configured metadata"
            );
            Metadata::new()
        }
    };
    for (key, value) in &opts.server_metadata {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// A `reqwest::Client` plus the client-authentication middleware and
/// caller-supplied middleware chain to apply to requests against one
/// endpoint kind, as resolved by [`EndpointResolver::http_client`].
#[derive(Debug, Clone)]
pub struct ConfiguredClient {
    pub http: reqwest::Client,
    /// `None` for the userinfo endpoint (spec.md §4.3): userinfo
    /// authenticates with the caller's bearer access token, not client
    /// credentials.
    pub authenticator: Option<Arc<dyn ClientAuthenticator>>,
    /// `user_middlewares` followed by `global_middlewares`, already
    /// concatenated in the order spec.md §4.3 names.
    pub middlewares: Vec<Arc<dyn RequestMiddleware>>,
}

fn default_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to construct the default reqwest client")
}

/// Stateless namespace for the endpoint-resolution operations of C3.
#[derive(Debug, Default)]
pub struct EndpointResolver;

impl EndpointResolver {
    /// Resolve the URL for `kind` at `iss`, per spec.md §4.3.
    ///
    /// # Errors
    /// Returns [`Error::MissingServerMetadata`] if the merged metadata has
    /// no `"<kind>_endpoint"` field.
    pub async fn url(iss: &Url, kind: EndpointKind, opts: &Options) -> Result<Url> {
        let metadata = merged_server_metadata(iss, opts).await;
        let field = kind.metadata_field();
        let raw = metadata
            .get(field)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::MissingServerMetadata {
                field: field.to_string(),
            })?;
        Url::parse(raw).map_err(|e| Error::MissingServerMetadata {
            field: format!("{field} ({e})"),
        })
    }

    /// Resolve the `token_endpoint_auth_method` in effect for `iss`:
    /// `client_conf`'s override, else server metadata's declared method,
    /// else [`DEFAULT_METHOD`].
    pub async fn auth_method(iss: &Url, client_conf: &ClientConf, opts: &Options) -> String {
        if let Some(method) = &client_conf.token_endpoint_auth_method {
            return method.clone();
        }
        let metadata = merged_server_metadata(iss, opts).await;
        metadata
            .get("token_endpoint_auth_method")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(DEFAULT_METHOD)
            .to_string()
    }

    /// Build a [`ConfiguredClient`] for `kind`, per spec.md §4.3's exact
    /// middleware ordering.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedClientAuthenticationMethod`] if the
    /// resolved method (for write endpoints) is not one this crate
    /// implements.
    pub async fn http_client(
        iss: &Url,
        kind: EndpointKind,
        client_conf: &ClientConf,
        opts: &Options,
    ) -> Result<ConfiguredClient> {
        let authenticator = match kind {
            EndpointKind::Userinfo => None,
            _ => {
                let method = Self::auth_method(iss, client_conf, opts).await;
                Some(client_auth::resolve(&method)?)
            }
        };

        let mut middlewares = opts.user_middlewares.clone();
        middlewares.extend(opts.global_middlewares.iter().cloned());

        Ok(ConfiguredClient {
            http: default_http_client(),
            authenticator,
            middlewares,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn url_reads_field_from_opts_server_metadata() {
        let mut server_metadata = Metadata::new();
        server_metadata.insert(
            "token_endpoint".to_string(),
            json!("https://idp.example/token"),
        );
        let opts = Options::builder()
            .server_metadata(server_metadata)
            .server_metadata_resolver(Arc::new(StaticServerMetadataResolver::default()))
            .build();
        let iss = Url::parse("https://idp.example").unwrap();
        let url = EndpointResolver::url(&iss, EndpointKind::Token, &opts)
            .await
            .unwrap();
        assert_eq!(url.as_str(), "https://idp.example/token");
    }

    #[tokio::test]
    async fn url_errors_when_field_missing() {
        let opts = Options::builder()
            .server_metadata_resolver(Arc::new(StaticServerMetadataResolver::default()))
            .build();
        let iss = Url::parse("https://idp.invalid").unwrap();
        let err = EndpointResolver::url(&iss, EndpointKind::Revocation, &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingServerMetadata { field } if field == "revocation_endpoint"));
    }

    #[tokio::test]
    async fn auth_method_defaults_to_client_secret_basic() {
        let opts = Options::builder()
            .server_metadata_resolver(Arc::new(StaticServerMetadataResolver::default()))
            .build();
        let client_conf = ClientConf::builder()
            .client_id("id".to_string())
            .client_secret("secret".to_string())
            .build();
        let iss = Url::parse("https://idp.invalid").unwrap();
        let method = EndpointResolver::auth_method(&iss, &client_conf, &opts).await;
        assert_eq!(method, "client_secret_basic");
    }

    #[tokio::test]
    async fn auth_method_prefers_client_conf_override() {
        let opts = Options::builder().build();
        let client_conf = ClientConf::builder()
            .client_id("id".to_string())
            .client_secret("secret".to_string())
            .token_endpoint_auth_method("client_secret_post")
            .build();
        let iss = Url::parse("https://idp.invalid").unwrap();
        let method = EndpointResolver::auth_method(&iss, &client_conf, &opts).await;
        assert_eq!(method, "client_secret_post");
    }
}
