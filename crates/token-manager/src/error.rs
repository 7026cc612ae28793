use std::sync::Arc;

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The RFC-standard endpoints this crate talks to, used to tag
/// transport-level errors so callers can tell which leg of a flow failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Token,
    Introspection,
    Revocation,
    Userinfo,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Endpoint::Token => "token",
            Endpoint::Introspection => "introspection",
            Endpoint::Revocation => "revocation",
            Endpoint::Userinfo => "userinfo",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    #[error("HTTP request to the {endpoint} endpoint failed with status {status}")]
    HTTPStatusError { endpoint: Endpoint, status: u16 },

    #[error("HTTP request to the {endpoint} endpoint failed: {reason}")]
    HTTPRequestError { endpoint: Endpoint, reason: String },

    #[error("Request failed: {0}")]
    Reqwest(#[from] Arc<reqwest::Error>),

    #[error("Server metadata is missing required field `{field}`")]
    MissingServerMetadata { field: String },

    #[error("Client configuration is missing required field `{field}`")]
    MissingClientMetadata { field: String },

    #[error("Unsupported client authentication method `{method}`")]
    UnsupportedClientAuthenticationMethod { method: String },

    #[error("No suitable access token found")]
    NoSuitableAccessTokenFound,

    #[error("No suitable refresh token found")]
    NoSuitableRefreshTokenFound,

    #[error("Token endpoint returned 200 without `access_token`/`token_type`")]
    IllegalTokenEndpointResponse,

    #[error("Cannot register an ID token that is not a compact JWS")]
    InvalidIDTokenRegistration,

    #[error("Userinfo endpoint returned an unexpected content type: {content_type}")]
    UserinfoEndpointInvalidContentType { content_type: String },

    #[error("Failed to decrypt the userinfo JWE response: {reason}")]
    UserinfoEndpointDecryptionFailure { reason: String },

    #[error("Failed to verify the userinfo JWS response: {reason}")]
    UserinfoEndpointVerificationFailure { reason: String },

    #[error("More than one result found where at most one was expected")]
    MultipleResultsError,

    #[error("Failed to persist record: {reason}")]
    InsertError { reason: String },

    #[error("Failed to (de)serialize token metadata: {reason}")]
    SerializationError { reason: String },
}

impl Error {
    pub(crate) fn http_status(endpoint: Endpoint, status: reqwest::StatusCode) -> Self {
        Error::HTTPStatusError {
            endpoint,
            status: status.as_u16(),
        }
    }

    pub(crate) fn http_request(endpoint: Endpoint, reason: impl std::fmt::Display) -> Self {
        Error::HTTPRequestError {
            endpoint,
            reason: reason.to_string(),
        }
    }
}

impl From<crate::store::StoreError> for Error {
    fn from(value: crate::store::StoreError) -> Self {
        match value {
            crate::store::StoreError::MultipleResultsError => Error::MultipleResultsError,
            crate::store::StoreError::InsertError { reason } => Error::InsertError { reason },
        }
    }
}
