//! Option defaults and client configuration (spec.md §4.7, §6 "Configuration
//! surface").

use std::sync::Arc;
use std::time::Duration;

use crate::jose::{JweDecrypter, JwsVerifier};
use crate::metadata::Metadata;
use crate::middleware::RequestMiddleware;
use crate::resolver::{JwksResolver, ServerMetadataResolver};

/// Per-call options shared by the access-token, refresh-token and claims
/// managers.
///
/// ```
/// use oauth2_token_manager::Options;
///
/// let opts = Options::builder().build();
/// assert!(opts.auto_introspect);
/// assert_eq!(opts.min_introspect_interval, std::time::Duration::from_secs(30));
/// ```
#[derive(typed_builder::TypedBuilder, Clone)]
pub struct Options {
    /// If `true`, or if the registered metadata has no `sub`, `register`
    /// introspects the token before storing it. Default `true`.
    #[builder(default = true)]
    pub auto_introspect: bool,

    /// Minimum interval between two introspection calls for the same
    /// token; within this window, `introspect` returns the cached
    /// metadata. Default 30 seconds.
    #[builder(default = Duration::from_secs(30))]
    pub min_introspect_interval: Duration,

    /// Minimum interval between two userinfo calls for the same
    /// `(issuer, subject)`. Default 30 seconds.
    #[builder(default = Duration::from_secs(30))]
    pub min_userinfo_refresh_interval: Duration,

    /// Whether `delete` also revokes the token server-side, in a
    /// fire-and-forget background task. Default `true`.
    #[builder(default = true)]
    pub revoke_on_delete: bool,

    /// Statically-known server metadata, merged over (and taking
    /// precedence over) whatever the `ServerMetadataResolver` returns.
    /// Empty by default.
    #[builder(default)]
    pub server_metadata: Metadata,

    /// Resolves `issuer -> server metadata document`. Defaults to
    /// [`crate::resolver::HttpServerMetadataResolver`] if not set.
    #[builder(default, setter(strip_option))]
    pub server_metadata_resolver: Option<Arc<dyn ServerMetadataResolver>>,

    /// Resolves `jwks_uri -> JWK set`. Defaults to
    /// [`crate::resolver::HttpJwksResolver`] if not set.
    #[builder(default, setter(strip_option))]
    pub jwks_resolver: Option<Arc<dyn JwksResolver>>,

    /// Verifies the signature on a compact JWS. Required for ID-token
    /// verification during a refresh grant and for signed userinfo
    /// responses; its absence is only an error if a flow actually needs
    /// it.
    #[builder(default, setter(strip_option))]
    pub jws_verifier: Option<Arc<dyn JwsVerifier>>,

    /// Decrypts a compact JWE. Required only for encrypted userinfo
    /// responses.
    #[builder(default, setter(strip_option))]
    pub jwe_decrypter: Option<Arc<dyn JweDecrypter>>,

    /// Middlewares applied after the client authenticator but before the
    /// global middlewares, in the order of spec.md §4.3.
    #[builder(default)]
    pub user_middlewares: Vec<Arc<dyn RequestMiddleware>>,

    /// Middlewares applied last, regardless of endpoint kind.
    #[builder(default)]
    pub global_middlewares: Vec<Arc<dyn RequestMiddleware>>,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("auto_introspect", &self.auto_introspect)
            .field("min_introspect_interval", &self.min_introspect_interval)
            .field(
                "min_userinfo_refresh_interval",
                &self.min_userinfo_refresh_interval,
            )
            .field("revoke_on_delete", &self.revoke_on_delete)
            .field("server_metadata", &self.server_metadata)
            .finish_non_exhaustive()
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::builder().build()
    }
}

/// The confidential client's own configuration: its credentials and its
/// declared JOSE preferences for userinfo responses (OIDC Core §5.3).
#[derive(typed_builder::TypedBuilder, Clone, veil::Redact)]
pub struct ClientConf {
    pub client_id: String,
    #[redact]
    pub client_secret: String,

    /// Overrides the `token_endpoint_auth_method` declared in server
    /// metadata. Defaults to `client_secret_basic` when neither is set,
    /// per spec.md §4.3.
    #[builder(default, setter(strip_option, into))]
    pub token_endpoint_auth_method: Option<String>,

    #[builder(default, setter(strip_option, into))]
    pub userinfo_signed_response_alg: Option<String>,

    #[builder(default, setter(strip_option, into))]
    pub userinfo_encrypted_response_alg: Option<String>,

    /// Defaults to `A128CBC-HS256` per OIDC Core §5.3 / spec.md §4.6 when
    /// an encrypted userinfo response alg is declared but no enc is.
    #[builder(default, setter(strip_option, into))]
    pub userinfo_encrypted_response_enc: Option<String>,

    /// The client's own private JWKS, used by the injected
    /// [`crate::jose::JweDecrypter`] to decrypt encrypted userinfo
    /// responses.
    #[builder(default, setter(strip_option))]
    pub private_jwks: Option<serde_json::Value>,
}

impl ClientConf {
    #[must_use]
    pub fn userinfo_encrypted_response_enc_or_default(&self) -> &str {
        self.userinfo_encrypted_response_enc
            .as_deref()
            .unwrap_or("A128CBC-HS256")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults_match_spec() {
        let opts = Options::builder().build();
        assert!(opts.auto_introspect);
        assert_eq!(opts.min_introspect_interval, Duration::from_secs(30));
        assert_eq!(opts.min_userinfo_refresh_interval, Duration::from_secs(30));
        assert!(opts.revoke_on_delete);
        assert!(opts.server_metadata.is_empty());
    }

    #[test]
    fn client_conf_debug_redacts_secret() {
        let conf = ClientConf::builder()
            .client_id("id".to_string())
            .client_secret("super-secret".to_string())
            .build();
        let debug = format!("{conf:?}");
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn userinfo_enc_default_is_a128cbc_hs256() {
        let conf = ClientConf::builder()
            .client_id("id".to_string())
            .client_secret("secret".to_string())
            .build();
        assert_eq!(conf.userinfo_encrypted_response_enc_or_default(), "A128CBC-HS256");
    }
}
