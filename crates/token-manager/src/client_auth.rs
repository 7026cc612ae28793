//! Client authentication middleware (spec.md §4.3, §6; RFC 6749 §2.3.1).
//!
//! `method` defaults to `client_secret_basic` when the server metadata
//! does not declare `token_endpoint_auth_method` (spec.md §4.3).

use crate::error::{Error, Result};
use crate::options::ClientConf;

pub const DEFAULT_METHOD: &str = "client_secret_basic";

/// Shapes an outbound request to carry the confidential client's
/// credentials. Implementations may set a header (`client_secret_basic`)
/// and/or push fields onto `form` (`client_secret_post`); `form` is
/// serialized into the request body by the caller after every
/// middleware in the chain has run.
pub trait ClientAuthenticator: Send + Sync + std::fmt::Debug {
    fn apply(
        &self,
        builder: reqwest::RequestBuilder,
        form: &mut Vec<(String, String)>,
        client_conf: &ClientConf,
    ) -> reqwest::RequestBuilder;
}

/// RFC 6749 §2.3.1: `Authorization: Basic base64(client_id:client_secret)`.
#[derive(Debug, Clone, Copy)]
pub struct ClientSecretBasic;

impl ClientAuthenticator for ClientSecretBasic {
    fn apply(
        &self,
        builder: reqwest::RequestBuilder,
        _form: &mut Vec<(String, String)>,
        client_conf: &ClientConf,
    ) -> reqwest::RequestBuilder {
        builder.basic_auth(&client_conf.client_id, Some(&client_conf.client_secret))
    }
}

/// RFC 6749 §2.3.1: `client_id`/`client_secret` as form parameters.
#[derive(Debug, Clone, Copy)]
pub struct ClientSecretPost;

impl ClientAuthenticator for ClientSecretPost {
    fn apply(
        &self,
        builder: reqwest::RequestBuilder,
        form: &mut Vec<(String, String)>,
        client_conf: &ClientConf,
    ) -> reqwest::RequestBuilder {
        form.push(("client_id".to_string(), client_conf.client_id.clone()));
        form.push((
            "client_secret".to_string(),
            client_conf.client_secret.clone(),
        ));
        builder
    }
}

/// No client authentication at all (public clients). Not reachable from
/// `resolve` below since this crate only serves confidential clients
/// (spec.md §1), but kept so a caller-extended method table can opt into
/// it explicitly.
#[derive(Debug, Clone, Copy)]
pub struct None_;

impl ClientAuthenticator for None_ {
    fn apply(
        &self,
        builder: reqwest::RequestBuilder,
        _form: &mut Vec<(String, String)>,
        _client_conf: &ClientConf,
    ) -> reqwest::RequestBuilder {
        builder
    }
}

/// Resolve a `token_endpoint_auth_method` string to a
/// [`ClientAuthenticator`].
///
/// # Errors
/// Returns [`Error::UnsupportedClientAuthenticationMethod`] for any method
/// this crate does not implement out of the box (e.g. `private_key_jwt`,
/// `tls_client_auth`). Callers needing those add their own dispatch ahead
/// of this one.
pub fn resolve(method: &str) -> Result<std::sync::Arc<dyn ClientAuthenticator>> {
    match method {
        "client_secret_basic" => Ok(std::sync::Arc::new(ClientSecretBasic)),
        "client_secret_post" => Ok(std::sync::Arc::new(ClientSecretPost)),
        other => Err(Error::UnsupportedClientAuthenticationMethod {
            method: other.to_string(),
        }),
    }
}
