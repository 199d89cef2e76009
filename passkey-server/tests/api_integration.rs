//! API integration tests for passkey-server.
//!
//! These tests drive the full register/authenticate flow through the REST
//! endpoints with a software authenticator, including the session cookie.

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use passkey_core::testutil::{tamper_signature, SoftAuthenticator};
use passkey_core::Challenge;
use passkey_server::create_router;
use serde_json::{json, Value};
use tower::ServiceExt;

/// Build the test router using the library's create_router function
fn create_test_app() -> Router {
    create_router()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, headers, json)
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, HeaderMap, Value) {
    post_json_with_cookie(app, uri, body, None).await
}

async fn post_json_with_cookie(
    app: &Router,
    uri: &str,
    body: Value,
    cookie: Option<&str>,
) -> (StatusCode, HeaderMap, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    send(app, request.body(Body::from(body.to_string())).unwrap()).await
}

async fn get(app: &Router, uri: &str, cookie: Option<&str>) -> (StatusCode, HeaderMap, Value) {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    send(app, request.body(Body::empty()).unwrap()).await
}

/// `name=value` part of the response's `Set-Cookie` header.
fn session_cookie(headers: &HeaderMap) -> String {
    let set_cookie = headers
        .get(header::SET_COOKIE)
        .expect("Set-Cookie header")
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

fn challenge_of(options: &Value) -> Challenge {
    Challenge::from_base64url(options["challenge"].as_str().unwrap()).unwrap()
}

/// Register `username` with `authenticator`; returns the session cookie.
async fn register(app: &Router, username: &str, authenticator: &SoftAuthenticator) -> String {
    let (status, _, options) = post_json(
        app,
        "/api/auth/register",
        json!({ "username": username, "displayName": "Test User" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let credential = authenticator.register(&challenge_of(&options));
    let (status, headers, json) = post_json(
        app,
        "/api/auth/verify-registration",
        json!({ "username": username, "credential": credential }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "verify-registration failed: {json}");
    session_cookie(&headers)
}

async fn authenticate_options(app: &Router, username: &str) -> Value {
    let (status, _, options) =
        post_json(app, "/api/auth/authenticate", json!({ "username": username })).await;
    assert_eq!(status, StatusCode::OK);
    options
}

// ============================================================================
// Health & Readiness Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let app = create_test_app();

    let (status, _, json) = get(&app, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["storage_available"], true);
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_ready_endpoint_returns_ok() {
    let app = create_test_app();

    let (status, _, json) = get(&app, "/ready", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
}

#[tokio::test]
async fn test_openapi_document_lists_auth_paths() {
    let app = create_test_app();

    let (status, _, json) = get(&app, "/api-docs/openapi.json", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/api/auth/register"].is_object());
    assert!(json["paths"]["/api/auth/verify-authentication"].is_object());
}

// ============================================================================
// Registration Tests
// ============================================================================

#[tokio::test]
async fn test_register_returns_creation_options() {
    let app = create_test_app();

    let (status, _, json) = post_json(
        &app,
        "/api/auth/register",
        json!({ "username": "alice", "displayName": "Alice" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["challenge"].is_string());
    assert_eq!(json["rp"]["id"], "localhost");
    assert_eq!(json["rp"]["name"], "My Web App");
    assert_eq!(json["user"]["name"], "alice");
    assert_eq!(json["user"]["displayName"], "Alice");
    assert_eq!(json["user"]["id"], "YWxpY2U");
    assert_eq!(json["timeout"], 60000);
    assert_eq!(json["attestation"], "direct");
    assert_eq!(
        json["authenticatorSelection"]["userVerification"],
        "required"
    );

    let algs: Vec<i64> = json["pubKeyCredParams"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["alg"].as_i64().unwrap())
        .collect();
    assert!(algs.contains(&-7));
    assert!(algs.contains(&-8));
    assert!(algs.contains(&-257));
}

#[tokio::test]
async fn test_register_requires_username() {
    let app = create_test_app();

    let (status, _, json) = post_json(&app, "/api/auth/register", json!({})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_INPUT");
    assert_eq!(json["error"], "Bad request: Username is required");
}

#[tokio::test]
async fn test_verify_registration_requires_credential() {
    let app = create_test_app();

    let (status, _, json) = post_json(
        &app,
        "/api/auth/verify-registration",
        json!({ "username": "alice" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_verify_registration_sets_session_cookie() {
    let app = create_test_app();
    let authenticator = SoftAuthenticator::es256();

    let (_, _, options) =
        post_json(&app, "/api/auth/register", json!({ "username": "alice" })).await;
    let credential = authenticator.register(&challenge_of(&options));

    let (status, headers, json) = post_json(
        &app,
        "/api/auth/verify-registration",
        json!({ "username": "alice", "credential": credential }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["algorithm"], -7);
    assert_eq!(json["counter"], 0);
    assert_eq!(json["credentialId"], credential.raw_id);

    let set_cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(set_cookie.starts_with("session="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
}

#[tokio::test]
async fn test_verify_registration_without_challenge_is_rejected() {
    let app = create_test_app();
    let authenticator = SoftAuthenticator::es256();
    let stale = Challenge::generate(32);

    let (status, _, json) = post_json(
        &app,
        "/api/auth/verify-registration",
        json!({ "username": "alice", "credential": authenticator.register(&stale) }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "CHALLENGE_MISSING_OR_EXPIRED");
    assert_eq!(json["error"], "Invalid challenge");
}

#[tokio::test]
async fn test_existing_username_cannot_be_registered_again() {
    let app = create_test_app();
    let owner = SoftAuthenticator::es256();
    register(&app, "erin", &owner).await;

    let (status, _, json) =
        post_json(&app, "/api/auth/register", json!({ "username": "erin" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");

    // A stale registration answer does not get through either
    let intruder = SoftAuthenticator::ed25519();
    let (status, headers, _) = post_json(
        &app,
        "/api/auth/verify-registration",
        json!({ "username": "erin", "credential": intruder.register(&Challenge::generate(32)) }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(headers.get(header::SET_COOKIE).is_none());

    // The owner's passkey still signs in
    let options = authenticate_options(&app, "erin").await;
    let (status, _, _) = post_json(
        &app,
        "/api/auth/verify-authentication",
        json!({ "username": "erin", "credential": owner.authenticate(&challenge_of(&options), 1) }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_signed_in_user_can_replace_credential() {
    let app = create_test_app();
    let old = SoftAuthenticator::es256();
    let cookie = register(&app, "frank", &old).await;

    let (status, _, options) = post_json_with_cookie(
        &app,
        "/api/auth/register",
        json!({ "username": "frank" }),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let new = SoftAuthenticator::ed25519();
    let (status, _, json) = post_json_with_cookie(
        &app,
        "/api/auth/verify-registration",
        json!({ "username": "frank", "credential": new.register(&challenge_of(&options)) }),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "replacement failed: {json}");
    assert_eq!(json["algorithm"], -8);

    let options = authenticate_options(&app, "frank").await;
    assert_eq!(
        options["allowCredentials"][0]["id"],
        passkey_core::encoding::encode(new.credential_id())
    );
}

#[tokio::test]
async fn test_session_for_other_user_cannot_replace_credential() {
    let app = create_test_app();
    register(&app, "grace", &SoftAuthenticator::es256()).await;
    let mallory_cookie = register(&app, "mallory", &SoftAuthenticator::es256()).await;

    let (status, _, json) = post_json_with_cookie(
        &app,
        "/api/auth/register",
        json!({ "username": "grace" }),
        Some(&mallory_cookie),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");
}

// ============================================================================
// Authentication Tests
// ============================================================================

#[tokio::test]
async fn test_authenticate_unknown_user_is_rejected() {
    let app = create_test_app();

    let (status, _, json) =
        post_json(&app, "/api/auth/authenticate", json!({ "username": "nobody" })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "NO_CREDENTIAL");
    assert_eq!(json["error"], "User not found");
}

#[tokio::test]
async fn test_full_flow_with_replay_rejected() {
    let app = create_test_app();
    let authenticator = SoftAuthenticator::es256();
    register(&app, "alice", &authenticator).await;

    let options = authenticate_options(&app, "alice").await;
    assert_eq!(options["rpId"], "localhost");
    assert_eq!(
        options["allowCredentials"][0]["id"],
        passkey_core::encoding::encode(authenticator.credential_id())
    );

    let assertion = authenticator.authenticate(&challenge_of(&options), 1);
    let (status, headers, json) = post_json(
        &app,
        "/api/auth/verify-authentication",
        json!({ "username": "alice", "credential": assertion }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["counter"], 1);
    assert_eq!(json["counterSupported"], true);
    assert!(session_cookie(&headers).starts_with("session="));

    // Same counter against a fresh challenge
    let options = authenticate_options(&app, "alice").await;
    let replay = authenticator.authenticate(&challenge_of(&options), 1);
    let (status, _, json) = post_json(
        &app,
        "/api/auth/verify-authentication",
        json!({ "username": "alice", "credential": replay }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "REPLAY_DETECTED");

    // Resubmitting the accepted assertion finds no outstanding challenge
    let (status, _, json) = post_json(
        &app,
        "/api/auth/verify-authentication",
        json!({ "username": "alice", "credential": assertion }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "CHALLENGE_MISSING_OR_EXPIRED");
}

#[tokio::test]
async fn test_tampered_signature_is_rejected() {
    let app = create_test_app();
    let authenticator = SoftAuthenticator::ed25519();
    register(&app, "bob", &authenticator).await;

    let options = authenticate_options(&app, "bob").await;
    let mut assertion = authenticator.authenticate(&challenge_of(&options), 1);
    tamper_signature(&mut assertion);

    let (status, headers, json) = post_json(
        &app,
        "/api/auth/verify-authentication",
        json!({ "username": "bob", "credential": assertion }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "SIGNATURE_INVALID");
    assert_eq!(json["error"], "Signature verification failed");
    assert!(headers.get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_counterless_authenticator_is_flagged() {
    let app = create_test_app();
    let authenticator = SoftAuthenticator::rs256();
    register(&app, "carol", &authenticator).await;

    let options = authenticate_options(&app, "carol").await;
    let assertion = authenticator.authenticate(&challenge_of(&options), 0);
    let (status, _, json) = post_json(
        &app,
        "/api/auth/verify-authentication",
        json!({ "username": "carol", "credential": assertion }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["counter"], 0);
    assert_eq!(json["counterSupported"], false);
}

// ============================================================================
// Session Tests
// ============================================================================

#[tokio::test]
async fn test_me_requires_session() {
    let app = create_test_app();

    let (status, _, json) = get(&app, "/api/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "UNAUTHORIZED");

    let (status, _, _) = get(
        &app,
        "/api/auth/me",
        Some("session=00000000-0000-4000-8000-000000000000"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_and_logout() {
    let app = create_test_app();
    let authenticator = SoftAuthenticator::es256();
    let cookie = register(&app, "dave", &authenticator).await;

    let (status, _, json) = get(&app, "/api/auth/me", Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["username"], "dave");
    assert_eq!(json["displayName"], "Test User");
    assert!(json["credentialId"].is_string());
    assert!(json["createdAt"].is_string());
    assert!(json.get("publicKey").is_none());

    let (status, headers, json) = get(&app, "/api/auth/logout", Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    let cleared = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cleared.contains("Max-Age=0"));

    let (status, _, _) = get(&app, "/api/auth/me", Some(&cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_without_session_succeeds() {
    let app = create_test_app();

    let (status, _, json) = get(&app, "/api/auth/logout", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
}
