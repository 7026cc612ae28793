//! The concrete scenarios of spec.md §8 (S1-S6), exercised end-to-end
//! against `LocalStore` and a `mockito` server standing in for the
//! authorization server.

use std::sync::Arc;

use base64::Engine;
use oauth2_token_manager::{
    AccessTokenManager, ClaimsManager, ClientConf, Error, JwksResolver, JwsVerifier, LocalStore,
    LocalStoreOptions, Options, RefreshTokenManager, StaticServerMetadataResolver, Store, Subject,
};
use serde_json::{json, Map, Value};
use url::Url;

fn client_conf() -> ClientConf {
    ClientConf::builder()
        .client_id("client-1".to_string())
        .client_secret("client-secret".to_string())
        .build()
}

fn base64url(value: &Value) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
}

/// Builds a compact JWS with an arbitrary header/payload and an opaque
/// (unverified by the fakes below) signature segment.
fn compact_jws(header: &Value, payload: &Value) -> String {
    format!("{}.{}.sig", base64url(header), base64url(payload))
}

/// A `JwsVerifier` that trusts any signature and simply decodes the
/// payload segment, so tests can exercise the verification *call site*
/// without shipping real JOSE crypto (out of this crate's scope,
/// spec.md §1).
#[derive(Debug)]
struct FakeJwsVerifier;

impl JwsVerifier for FakeJwsVerifier {
    fn verify(
        &self,
        compact: &str,
        _jwks: &Value,
        _alg: &str,
    ) -> oauth2_token_manager::error::Result<Value> {
        let payload_segment = compact.split('.').nth(1).expect("compact JWS");
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload_segment)
            .expect("valid base64url payload");
        Ok(serde_json::from_slice(&decoded).expect("valid JSON payload"))
    }
}

/// A `JwksResolver` that never touches the network; the fixed key set it
/// returns is irrelevant since [`FakeJwsVerifier`] ignores it.
#[derive(Debug)]
struct FakeJwksResolver;

#[async_trait::async_trait]
impl JwksResolver for FakeJwksResolver {
    async fn resolve(&self, _jwks_uri: &Url) -> oauth2_token_manager::error::Result<Value> {
        Ok(json!({ "keys": [] }))
    }
}

/// Server metadata plus the JOSE fakes, wired into [`Options`] so none of
/// the scenarios below perform a real discovery-document or JWKS fetch.
fn opts_for(server: &mockito::ServerGuard, extra: &[(&str, Value)]) -> Options {
    let mut server_metadata = Map::new();
    server_metadata.insert(
        "token_endpoint".to_string(),
        json!(format!("{}/token", server.url())),
    );
    server_metadata.insert(
        "introspection_endpoint".to_string(),
        json!(format!("{}/introspect", server.url())),
    );
    server_metadata.insert(
        "revocation_endpoint".to_string(),
        json!(format!("{}/revoke", server.url())),
    );
    server_metadata.insert(
        "userinfo_endpoint".to_string(),
        json!(format!("{}/userinfo", server.url())),
    );
    server_metadata.insert("jwks_uri".to_string(), json!("https://fake-jwks.example/jwks"));
    for (key, value) in extra {
        server_metadata.insert((*key).to_string(), value.clone());
    }

    Options::builder()
        .server_metadata(server_metadata)
        .server_metadata_resolver(Arc::new(StaticServerMetadataResolver::default()))
        .jws_verifier(Arc::new(FakeJwsVerifier))
        .jwks_resolver(Arc::new(FakeJwksResolver))
        .auto_introspect(false)
        .build()
}

async fn local_store() -> Arc<LocalStore> {
    Arc::new(LocalStore::start(LocalStoreOptions::default()).await.unwrap())
}

/// S1: fresh refresh, no rotation.
#[tokio::test]
async fn s1_fresh_refresh_without_rotation() {
    let store = local_store().await;
    let iss = Url::parse("https://idp.example").unwrap();
    let mut server = mockito::Server::new_async().await;
    let opts = opts_for(&server, &[]);

    store
        .put_refresh_token(
            "R",
            Map::from_iter([
                ("sub".to_string(), json!("u")),
                ("scope".to_string(), json!(["s1", "s2"])),
            ]),
            iss.as_str(),
        )
        .await
        .unwrap();

    let mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"AT1","token_type":"Bearer","expires_in":3600}"#)
        .create_async()
        .await;

    let before = oauth2_token_manager_test_support::now();
    let access_tokens = AccessTokenManager::new(store.clone());
    let (at, token_type) = access_tokens
        .get(
            &iss,
            &Subject::User("u".to_string()),
            &client_conf(),
            None,
            &opts,
        )
        .await
        .unwrap();
    let after = oauth2_token_manager_test_support::now();

    assert_eq!(at, "AT1");
    assert_eq!(token_type, "Bearer");
    mock.assert_async().await;

    let record = store.get_access_token("AT1").await.unwrap().unwrap();
    assert_eq!(record.metadata.get("sub").unwrap(), "u");
    assert_eq!(record.metadata.get("scope").unwrap(), &json!(["s1", "s2"]));
    let exp = record.metadata.get("exp").unwrap().as_i64().unwrap();
    assert!(exp >= before + 3600 && exp <= after + 3600);
}

/// S2: refresh with rotation and an accompanying ID token.
#[tokio::test]
async fn s2_refresh_with_rotation_and_id_token() {
    let store = local_store().await;
    let iss = Url::parse("https://idp.example").unwrap();
    let mut server = mockito::Server::new_async().await;
    let opts = opts_for(&server, &[]);

    store
        .put_refresh_token(
            "R",
            Map::from_iter([
                ("sub".to_string(), json!("u")),
                ("scope".to_string(), json!(["s1", "s2"])),
            ]),
            iss.as_str(),
        )
        .await
        .unwrap();

    let id_token = compact_jws(
        &json!({"alg": "RS256", "typ": "JWT"}),
        &json!({"sub": "u", "iss": iss.as_str(), "aud": "client-1", "iat": 1_000_000, "name": "U"}),
    );
    let body = json!({
        "access_token": "AT1",
        "token_type": "Bearer",
        "expires_in": 3600,
        "refresh_token": "R2",
        "id_token": id_token,
    });

    let mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;

    let refresh_tokens = RefreshTokenManager::new(store.clone());
    let (at, _token_type, _metadata) = refresh_tokens
        .request_access_token(&iss, &Subject::User("u".to_string()), &client_conf(), None, &opts)
        .await
        .unwrap();
    assert_eq!(at, "AT1");
    mock.assert_async().await;

    assert!(store.get_refresh_token("R").await.unwrap().is_none());
    assert!(store.get_refresh_token("R2").await.unwrap().is_some());

    let claims = ClaimsManager::new(store.clone());
    let stored_id_token = claims.get_id_token(&iss, "u").await.unwrap();
    assert_eq!(stored_id_token.as_deref(), Some(id_token.as_str()));
}

/// S3: introspection freshness. The record a subsequent `introspect()`
/// checks against is the one `register()` itself writes, so a `register`
/// (which always introspects once to obtain `sub`/fill metadata) followed
/// immediately by an explicit `introspect()` call produces exactly one
/// network request in total, with the second call served from the store.
#[tokio::test]
async fn s3_introspection_is_freshness_gated() {
    let store = local_store().await;
    let iss = Url::parse("https://idp.example").unwrap();
    let mut server = mockito::Server::new_async().await;
    let opts = Options::builder()
        .server_metadata(Map::from_iter([
            (
                "introspection_endpoint".to_string(),
                json!(format!("{}/introspect", server.url())),
            ),
        ]))
        .server_metadata_resolver(Arc::new(StaticServerMetadataResolver::default()))
        .auto_introspect(true)
        .min_introspect_interval(std::time::Duration::from_secs(30))
        .build();

    let mock = server
        .mock("POST", "/introspect")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"active":true,"sub":"u","scope":"s1 s2"}"#)
        .expect(1)
        .create_async()
        .await;

    let access_tokens = AccessTokenManager::new(store.clone());
    access_tokens
        .register("AT1", "Bearer", Map::new(), &iss, &client_conf(), &opts)
        .await
        .unwrap();

    let metadata = access_tokens
        .introspect("AT1", &iss, &client_conf(), &opts)
        .await
        .unwrap();
    assert_eq!(metadata.get("sub").unwrap(), "u");

    mock.assert_async().await;
}

/// S4: userinfo returns `application/jwt`; claims are JWS-verified,
/// persisted, and merged with the already-stored ID token.
#[tokio::test]
async fn s4_userinfo_jwt_path_is_verified_and_merged() {
    let store = local_store().await;
    let iss = Url::parse("https://idp.example").unwrap();
    let mut server = mockito::Server::new_async().await;
    let opts = opts_for(&server, &[]);

    store
        .put_access_token(
            "AT1",
            "Bearer",
            Map::from_iter([("sub".to_string(), json!("u"))]),
            iss.as_str(),
        )
        .await
        .unwrap();

    let stored_id_token = compact_jws(
        &json!({"alg": "RS256"}),
        &json!({"sub": "u", "iat": 1, "name": "From ID token"}),
    );
    store.put_id_token(iss.as_str(), "u", &stored_id_token).await.unwrap();

    let userinfo_jws = compact_jws(
        &json!({"alg": "RS256"}),
        &json!({"sub": "u", "email": "u@example.com"}),
    );

    let mut client_conf = client_conf();
    client_conf.userinfo_signed_response_alg = Some("RS256".to_string());

    let mock = server
        .mock("GET", "/userinfo")
        .match_header("authorization", "Bearer AT1")
        .with_status(200)
        .with_header("content-type", "application/jwt")
        .with_body(userinfo_jws)
        .create_async()
        .await;

    let claims = ClaimsManager::new(store.clone());
    let merged = claims
        .get_claims(&iss, "u", &client_conf, &opts)
        .await
        .unwrap();
    mock.assert_async().await;

    assert_eq!(merged.get("email").unwrap(), "u@example.com");

    let record = store.get_claims(iss.as_str(), "u").await.unwrap().unwrap();
    assert_eq!(
        record.claims.unwrap().get("email").unwrap(),
        "u@example.com"
    );
}

/// S5: `delete(..., revoke_on_delete = true)` returns immediately; the
/// revocation POST lands shortly after, racing the background task.
#[tokio::test]
async fn s5_revoke_on_delete_is_fire_and_forget() {
    let store = local_store().await;
    let iss = Url::parse("https://idp.example").unwrap();
    let mut server = mockito::Server::new_async().await;
    let opts = opts_for(&server, &[]);

    store
        .put_access_token("AT1", "Bearer", Map::new(), iss.as_str())
        .await
        .unwrap();

    let mock = server
        .mock("POST", "/revoke")
        .match_header("authorization", mockito::Matcher::Any)
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::Regex("token=AT1".to_string()),
            mockito::Matcher::Regex("token_type_hint=access_token".to_string()),
        ]))
        .with_status(200)
        .create_async()
        .await;

    let access_tokens = AccessTokenManager::new(store.clone());
    access_tokens
        .delete("AT1", &iss, &client_conf(), &opts)
        .await
        .unwrap();

    assert!(store.get_access_token("AT1").await.unwrap().is_none());

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    mock.assert_async().await;
}

/// S6: a 200 response missing `access_token`/`token_type` is illegal and
/// leaves the store untouched.
#[tokio::test]
async fn s6_illegal_token_endpoint_response_leaves_store_unchanged() {
    let store = local_store().await;
    let iss = Url::parse("https://idp.example").unwrap();
    let mut server = mockito::Server::new_async().await;
    let opts = opts_for(&server, &[]);

    store
        .put_refresh_token(
            "R",
            Map::from_iter([("sub".to_string(), json!("u"))]),
            iss.as_str(),
        )
        .await
        .unwrap();

    let mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .create_async()
        .await;

    let refresh_tokens = RefreshTokenManager::new(store.clone());
    let err = refresh_tokens
        .request_access_token(&iss, &Subject::User("u".to_string()), &client_conf(), None, &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IllegalTokenEndpointResponse));
    mock.assert_async().await;

    assert!(store.get_refresh_token("R").await.unwrap().is_some());
}

/// Small time helper shared by the tests above, kept local to this file
/// rather than pulled from the crate (the crate's `now_unix` is private).
mod oauth2_token_manager_test_support {
    pub fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }
}
