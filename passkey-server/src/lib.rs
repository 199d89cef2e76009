//! Passkey Server Library - REST API components for the passkey relying party
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod config;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod session;
pub mod state;
pub mod storage;

pub use config::Config;
pub use error::ApiError;
pub use openapi::ApiDoc;
pub use routes::{create_router, create_router_with_state};
pub use session::{session_layer, KvSessionStore, IDENTITY_KEY, SESSION_COOKIE};
pub use state::AppState;
pub use storage::PostgresStore;
