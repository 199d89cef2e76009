//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3 document served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::handlers::{
    AuthenticateRequest, HealthResponse, LogoutResponse, MeResponse, ReadyResponse,
    RegisterRequest, VerifyAuthenticationRequest, VerifyAuthenticationResponse,
    VerifyRegistrationRequest, VerifyRegistrationResponse,
};

/// Passkey API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Passkey Relying Party API",
        version = "0.1.0",
        description = r#"
## Passwordless sign-in with WebAuthn passkeys

1. `POST /api/auth/register` returns options for `navigator.credentials.create()`
2. `POST /api/auth/verify-registration` checks the attestation and stores the credential
3. `POST /api/auth/authenticate` returns options for `navigator.credentials.get()`
4. `POST /api/auth/verify-authentication` checks the signed assertion

Every challenge is single-use and expires. A successful verification sets an
`HttpOnly` session cookie read by `/api/auth/me`.

Binary fields are unpadded base64url strings; algorithms are COSE identifiers
(-8 Ed25519, -7 ES256, -257 RS256).
"#,
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:4455", description = "Local development server")
    ),
    tags(
        (name = "Passkey", description = "Registration, authentication and session endpoints"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::auth::register,
        crate::handlers::auth::verify_registration,
        crate::handlers::auth::authenticate,
        crate::handlers::auth::verify_authentication,
        crate::handlers::auth::me,
        crate::handlers::auth::logout,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            RegisterRequest,
            VerifyRegistrationRequest,
            VerifyRegistrationResponse,
            AuthenticateRequest,
            VerifyAuthenticationRequest,
            VerifyAuthenticationResponse,
            MeResponse,
            LogoutResponse,
            passkey_core::RegistrationChallenge,
            passkey_core::AuthenticationChallenge,
            passkey_core::RegistrationCredential,
            passkey_core::AssertionCredential,
        )
    )
)]
pub struct ApiDoc;
