//! Request middleware seam (spec.md §4.3).
//!
//! `EndpointResolver::http_client` composes, in order:
//! `[client_authenticator, form_url_encoded, decode_json, user middlewares,
//! global middlewares]` for the token/introspection/revocation endpoints,
//! and `[decode_json, global middlewares]` for userinfo. The
//! client-authenticator step is [`crate::client_auth::ClientAuthenticator`];
//! `form_url_encoded`/`decode_json` are built into [`crate::resolver`]'s
//! request/response helpers rather than modeled as middlewares, since they
//! are not optional. `user_middlewares`/`global_middlewares` are the
//! caller-extensible tail of the chain, modeled here.

use crate::error::Result;

/// A caller-supplied step in the outbound request chain, applied to the
/// already-built [`reqwest::Request`] before it is sent.
pub trait RequestMiddleware: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// May reject or fail to transform the request.
    fn apply(&self, request: reqwest::Request) -> Result<reqwest::Request>;
}

/// Apply a sequence of middlewares in order, short-circuiting on the first
/// error.
pub(crate) fn apply_all(
    middlewares: &[std::sync::Arc<dyn RequestMiddleware>],
    mut request: reqwest::Request,
) -> Result<reqwest::Request> {
    for middleware in middlewares {
        request = middleware.apply(request)?;
    }
    Ok(request)
}
