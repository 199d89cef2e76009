//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod auth;
pub mod health;

pub use crate::state::AppState;
pub use auth::{
    authenticate, logout, me, register, verify_authentication, verify_registration,
    AuthenticateRequest, LogoutResponse, MeResponse, RegisterRequest,
    VerifyAuthenticationRequest, VerifyAuthenticationResponse, VerifyRegistrationRequest,
    VerifyRegistrationResponse,
};
pub use health::{health, ready, HealthResponse, ReadyResponse};
