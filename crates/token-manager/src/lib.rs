#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![forbid(unsafe_code)]

//! [![Crates.io](https://img.shields.io/crates/v/oauth2-token-manager)](https://crates.io/crates/oauth2-token-manager)
//! [![License](https://img.shields.io/badge/License-Apache_2.0-blue.svg)](https://opensource.org/licenses/Apache-2.0)
//!
//! # OAuth2/OIDC Token Manager
//!
//! A store-backed manager for OAuth2 access tokens, refresh tokens and
//! OIDC claims/ID tokens held on behalf of a confidential client. It does
//! not run an authorization-code/PKCE flow itself; it manages tokens a
//! caller already has (or hands it a refresh token for), keeping them
//! fresh via the refresh grant (RFC 6749 §6), introspection (RFC 7662),
//! revocation (RFC 7009) and the OIDC userinfo endpoint (OIDC Core §5.3).
//!
//! Features:
//!
//! * Pluggable persistence via the [`Store`] trait, with [`LocalStore`]
//!   (`dashmap` + `sled`) as a ready-to-use default.
//! * Automatic refresh-token-to-access-token exchange when no cached
//!   access token satisfies a request.
//! * Freshness-gated introspection and userinfo refresh, to bound request
//!   volume against the authorization server.
//! * `client_secret_basic` / `client_secret_post` client authentication,
//!   resolved from server metadata or overridden per client.
//! * JOSE operations that need real key material (JWS verification, JWE
//!   decryption, JWKS-set fetching) are injected via traits; this crate
//!   ships simple HTTP-backed defaults.
//! * Safe defaults - does not follow redirects, hides the client secret
//!   in `Debug`, never logs a raw token.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use oauth2_token_manager::{AccessTokenManager, ClientConf, LocalStore, Options, Subject};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(LocalStore::start(Default::default()).await.unwrap());
//!     let access_tokens = AccessTokenManager::new(store);
//!
//!     let iss = Url::parse("https://idp.example").unwrap();
//!     let client_conf = ClientConf::builder()
//!         .client_id("my-client-id".to_string())
//!         .client_secret("my-client-secret".to_string())
//!         .build();
//!
//!     let (access_token, token_type) = access_tokens
//!         .get(
//!             &iss,
//!             &Subject::ClientCredentials,
//!             &client_conf,
//!             None,
//!             &Options::default(),
//!         )
//!         .await
//!         .unwrap();
//!     let _ = (access_token, token_type);
//! }
//! ```

mod access_token;
mod claims;
mod client_auth;
mod digest;
pub mod error;
mod jose;
mod metadata;
mod middleware;
mod options;
mod refresh_token;
mod resolver;
mod store;
mod validity;
mod wire;

pub use access_token::{AccessTokenManager, Subject};
pub use claims::ClaimsManager;
pub use client_auth::{
    ClientAuthenticator, ClientSecretBasic, ClientSecretPost, None_ as NoClientAuthentication,
    DEFAULT_METHOD,
};
pub use error::{Error, Result};
pub use jose::{JweDecrypter, JwsVerifier};
pub use metadata::Metadata;
pub use middleware::RequestMiddleware;
pub use options::{ClientConf, Options};
pub use refresh_token::RefreshTokenManager;
pub use resolver::{
    EndpointKind, EndpointResolver, HttpJwksResolver, HttpServerMetadataResolver, JwksResolver,
    ServerMetadataResolver, StaticServerMetadataResolver,
};
pub use store::{
    AccessTokenRecord, ClaimsRecord, LocalStore, LocalStoreOptions, RefreshTokenRecord, Store,
};
