//! Passkey flow endpoints
//!
//! `/api/auth/register` and `/api/auth/authenticate` hand out challenge
//! options; the matching `verify-*` endpoints check the browser's response
//! and start a session. `me` and `logout` operate on that session.
//!
//! Registering an identity that already holds a credential replaces it, and
//! is only allowed from a session signed in as that identity.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use passkey_core::{
    AssertionCredential, AuthenticationChallenge, CounterStatus, Identity, PasskeyError,
    RegistrationChallenge, RegistrationCredential,
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::session;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyRegistrationRequest {
    pub username: Option<String>,
    pub credential: Option<RegistrationCredential>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRegistrationResponse {
    pub success: bool,
    pub credential_id: String,
    /// COSE algorithm identifier
    pub algorithm: i64,
    pub counter: u32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthenticateRequest {
    pub username: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyAuthenticationRequest {
    pub username: Option<String>,
    pub credential: Option<AssertionCredential>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAuthenticationResponse {
    pub success: bool,
    pub counter: u32,
    /// False for authenticators that keep no signature counter
    pub counter_supported: bool,
}

/// Current user; never includes the public key.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub username: String,
    pub display_name: String,
    pub credential_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub success: bool,
}

fn require_username(username: Option<String>) -> Result<Identity, ApiError> {
    let username = username
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Username is required"))?;
    Ok(Identity::parse(username)?)
}

/// Whether `session` is signed in as `identity`.
async fn signed_in_as(session: &Session, identity: &Identity) -> Result<bool, ApiError> {
    Ok(session::current_identity(session).await?.as_ref() == Some(identity))
}

/// POST /api/auth/register
///
/// Issue registration options for `navigator.credentials.create()`.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "Passkey",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Registration options", body = RegistrationChallenge),
        (status = 400, description = "Missing or invalid username"),
        (status = 409, description = "Username taken, or a challenge is already outstanding"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegistrationChallenge>, ApiError> {
    let identity = require_username(req.username)?;
    let display_name = req.display_name.as_deref();
    let options = if signed_in_as(&session, &identity).await? {
        state
            .rp
            .issue_replacement_challenge(&identity, display_name)
            .await?
    } else {
        state
            .rp
            .issue_registration_challenge(&identity, display_name)
            .await?
    };
    Ok(Json(options))
}

/// POST /api/auth/verify-registration
///
/// Verify the attestation, store the credential and start a session.
#[utoipa::path(
    post,
    path = "/api/auth/verify-registration",
    tag = "Passkey",
    request_body = VerifyRegistrationRequest,
    responses(
        (status = 200, description = "Credential registered, session cookie set", body = VerifyRegistrationResponse),
        (status = 400, description = "Missing fields or verification failed"),
        (status = 409, description = "Username or credential id already registered"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn verify_registration(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<VerifyRegistrationRequest>,
) -> Result<Json<VerifyRegistrationResponse>, ApiError> {
    let identity = require_username(req.username)?;
    let credential = req
        .credential
        .ok_or_else(|| ApiError::bad_request("Credential is required"))?;

    let record = if signed_in_as(&session, &identity).await? {
        state.rp.replace_credential(&identity, &credential).await?
    } else {
        state.rp.verify_registration(&identity, &credential).await?
    };
    session::sign_in(&session, &identity).await?;

    Ok(Json(VerifyRegistrationResponse {
        success: true,
        credential_id: record.credential_id_b64(),
        algorithm: record.algorithm.id(),
        counter: record.sign_count,
    }))
}

/// POST /api/auth/authenticate
///
/// Issue authentication options for `navigator.credentials.get()`.
#[utoipa::path(
    post,
    path = "/api/auth/authenticate",
    tag = "Passkey",
    request_body = AuthenticateRequest,
    responses(
        (status = 200, description = "Authentication options", body = AuthenticationChallenge),
        (status = 400, description = "Missing username or user not registered"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn authenticate(
    State(state): State<AppState>,
    Json(req): Json<AuthenticateRequest>,
) -> Result<Json<AuthenticationChallenge>, ApiError> {
    let identity = require_username(req.username)?;
    let options = state.rp.issue_authentication_challenge(&identity).await?;
    Ok(Json(options))
}

/// POST /api/auth/verify-authentication
///
/// Verify the assertion, advance the signature counter and start a session.
#[utoipa::path(
    post,
    path = "/api/auth/verify-authentication",
    tag = "Passkey",
    request_body = VerifyAuthenticationRequest,
    responses(
        (status = 200, description = "Authenticated, session cookie set", body = VerifyAuthenticationResponse),
        (status = 400, description = "Missing fields or verification failed"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn verify_authentication(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<VerifyAuthenticationRequest>,
) -> Result<Json<VerifyAuthenticationResponse>, ApiError> {
    let identity = require_username(req.username)?;
    let credential = req
        .credential
        .ok_or_else(|| ApiError::bad_request("Credential is required"))?;

    let outcome = state.rp.verify_authentication(&identity, &credential).await?;
    session::sign_in(&session, &identity).await?;

    Ok(Json(VerifyAuthenticationResponse {
        success: true,
        counter: outcome.sign_count,
        counter_supported: outcome.counter_status == CounterStatus::Advanced,
    }))
}

/// GET /api/auth/me
///
/// Return the signed-in user's credential summary.
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "Passkey",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn me(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<MeResponse>, ApiError> {
    let identity = session::current_identity(&session)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;

    let record = match state.rp.find_credential(&identity).await {
        Ok(record) => record,
        Err(PasskeyError::NoCredential(_)) => {
            return Err(ApiError::unauthorized("User not found"));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(MeResponse {
        username: record.identity.to_string(),
        display_name: record.display_name.clone(),
        credential_id: record.credential_id_b64(),
        created_at: record.created_at,
        last_used_at: record.last_used_at,
    }))
}

/// GET /api/auth/logout
///
/// Revoke the session and clear its cookie. Succeeds without a session too.
#[utoipa::path(
    get,
    path = "/api/auth/logout",
    tag = "Passkey",
    responses((status = 200, description = "Signed out", body = LogoutResponse))
)]
pub async fn logout(session: Session) -> Result<Json<LogoutResponse>, ApiError> {
    session.flush().await?;
    Ok(Json(LogoutResponse { success: true }))
}
