//! Passkey Core - WebAuthn relying-party protocol engine
//!
//! This crate issues registration and authentication challenges, stores
//! per-identity public-key credentials and verifies that a client-presented
//! attestation or assertion answers an outstanding challenge.
//!
//! # Features
//!
//! - Single-use, TTL-bound challenges consumed atomically
//! - Signature verification for Ed25519 (-8), ES256 (-7) and RS256 (-257)
//! - Signature counter replay detection with counter-less authenticators flagged
//! - Packed self and certificate attestation signature checks
//! - Pluggable [`KeyValueStore`] with a lock-sharded in-memory backend
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use passkey_core::{Identity, MemoryStore, RelyingParty, RelyingPartyConfig};
//!
//! # async fn example(credential: passkey_core::RegistrationCredential) -> passkey_core::Result<()> {
//! let rp = RelyingParty::new(RelyingPartyConfig::default(), Arc::new(MemoryStore::new()));
//! let alice = Identity::parse("alice")?;
//!
//! // Send the options to the browser, which calls navigator.credentials.create()
//! let options = rp.issue_registration_challenge(&alice, Some("Alice")).await?;
//! # let _ = options;
//!
//! // Verify the browser's response and persist the credential
//! let record = rp.verify_registration(&alice, &credential).await?;
//! println!("registered {}", record.credential_id_b64());
//! # Ok(())
//! # }
//! ```

pub mod assertion;
pub mod attestation;
pub mod authenticator_data;
pub mod challenge;
pub mod client_data;
pub mod config;
pub mod cose;
pub mod credential;
pub mod encoding;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod payload;
pub mod registration;
pub mod storage;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

// Re-export main types for convenience
pub use assertion::{AssertionVerifier, AuthenticationOutcome};
pub use attestation::{AttestationFormat, AttestationObject, AttestationType};
pub use authenticator_data::{AttestedCredentialData, AuthenticatorData, AuthenticatorFlags};
pub use challenge::{Challenge, ChallengePurpose, ChallengeStore, PendingChallenge};
pub use client_data::{ClientDataType, CollectedClientData};
pub use config::{ConfigError, RelyingPartyConfig, UserVerification, VerificationPolicy};
pub use cose::{CoseAlgorithm, CosePublicKey};
pub use credential::{CounterStatus, CredentialRecord, CredentialRegistry};
pub use error::{ErrorKind, PasskeyError, Result};
pub use identity::Identity;
pub use orchestrator::{
    AuthenticationChallenge, FlowState, RegistrationChallenge, RelyingParty,
};
pub use payload::{
    AssertionCredential, AssertionResponse, AttestationResponse, RegistrationCredential,
};
pub use registration::RegistrationVerifier;
pub use storage::{KeyValueStore, MemoryStore, StorageError, StorageResult};
