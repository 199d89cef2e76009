//! Four-step protocol flow
//!
//! ```text
//! issue_registration_challenge -> verify_registration
//! issue_replacement_challenge -> replace_credential
//! issue_authentication_challenge -> verify_authentication
//! ```
//!
//! [`RelyingParty`] keeps no state of its own between calls; everything lives
//! in the challenge store and credential registry. Per identity the flow is
//! `Idle -> ChallengeIssued -> Verified | Failed`, and any verification
//! outcome returns the identity to `Idle` because the challenge is consumed.

use std::sync::Arc;

use serde::Serialize;

use crate::assertion::{AssertionVerifier, AuthenticationOutcome};
use crate::challenge::{ChallengePurpose, ChallengeStore};
use crate::config::{RelyingPartyConfig, UserVerification};
use crate::cose::CoseAlgorithm;
use crate::credential::{CredentialRecord, CredentialRegistry};
use crate::error::{PasskeyError, Result};
use crate::identity::Identity;
use crate::payload::{AssertionCredential, RegistrationCredential};
use crate::registration::RegistrationVerifier;
use crate::storage::KeyValueStore;

const PUBLIC_KEY_TYPE: &str = "public-key";

/// Options handed to the client for `navigator.credentials.create()`.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct RegistrationChallenge {
    /// Unpadded base64url challenge
    pub challenge: String,
    pub rp: RelyingPartyEntity,
    /// `user.id` is the identity handle
    pub user: UserEntity,
    #[serde(rename = "pubKeyCredParams")]
    pub supported_algorithms: Vec<CredentialParameters>,
    pub authenticator_selection: AuthenticatorSelection,
    /// Milliseconds
    pub timeout: u64,
    pub attestation: String,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RelyingPartyEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CredentialParameters {
    #[serde(rename = "type")]
    pub ty: String,
    /// COSE algorithm identifier
    pub alg: i64,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub authenticator_attachment: String,
    pub resident_key: String,
    pub user_verification: UserVerification,
}

/// Options handed to the client for `navigator.credentials.get()`.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationChallenge {
    pub challenge: String,
    pub rp_id: String,
    /// The single credential registered for the identity
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub timeout: u64,
    pub user_verification: UserVerification,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub ty: String,
    pub id: String,
}

/// Where an identity currently sits in the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "purpose")]
pub enum FlowState {
    Idle,
    ChallengeIssued(ChallengePurpose),
}

/// Relying party protocol engine.
#[derive(Clone)]
pub struct RelyingParty {
    config: Arc<RelyingPartyConfig>,
    store: Arc<dyn KeyValueStore>,
    challenges: ChallengeStore,
    credentials: CredentialRegistry,
    registration: RegistrationVerifier,
    assertion: AssertionVerifier,
}

impl RelyingParty {
    pub fn new(config: RelyingPartyConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let challenges = ChallengeStore::new(
            store.clone(),
            config.challenge_ttl,
            config.challenge_bytes,
            config.allow_challenge_overwrite,
        );
        let credentials = CredentialRegistry::new(store.clone());
        let registration = RegistrationVerifier::new(challenges.clone(), (&config).into());
        let assertion =
            AssertionVerifier::new(challenges.clone(), credentials.clone(), (&config).into());

        Self {
            config: Arc::new(config),
            store,
            challenges,
            credentials,
            registration,
            assertion,
        }
    }

    pub fn config(&self) -> &RelyingPartyConfig {
        &self.config
    }

    /// The backing store, shared with the transport for its own records.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn challenges(&self) -> &ChallengeStore {
        &self.challenges
    }

    pub fn credentials(&self) -> &CredentialRegistry {
        &self.credentials
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.config.ceremony_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Issue a challenge for an identity's first credential.
    ///
    /// Fails [`PasskeyError::Conflict`] if the identity already has one; use
    /// [`issue_replacement_challenge`](Self::issue_replacement_challenge) to
    /// swap it.
    pub async fn issue_registration_challenge(
        &self,
        identity: &Identity,
        display_name: Option<&str>,
    ) -> Result<RegistrationChallenge> {
        if self.credentials.find_optional(identity).await?.is_some() {
            return Err(PasskeyError::Conflict(format!(
                "{identity} already has a registered credential"
            )));
        }
        self.registration_options(identity, display_name).await
    }

    /// Issue a challenge for replacing an identity's existing credential.
    ///
    /// Callers must have authenticated the identity first; this only fails
    /// [`PasskeyError::NoCredential`] when there is nothing to replace.
    pub async fn issue_replacement_challenge(
        &self,
        identity: &Identity,
        display_name: Option<&str>,
    ) -> Result<RegistrationChallenge> {
        self.find_credential(identity).await?;
        self.registration_options(identity, display_name).await
    }

    async fn registration_options(
        &self,
        identity: &Identity,
        display_name: Option<&str>,
    ) -> Result<RegistrationChallenge> {
        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(identity.as_str())
            .to_string();

        let challenge = self
            .challenges
            .issue(
                identity,
                ChallengePurpose::Registration,
                Some(display_name.clone()),
            )
            .await?;

        tracing::info!(identity = %identity, "Registration challenge issued");

        Ok(RegistrationChallenge {
            challenge: challenge.to_base64url(),
            rp: RelyingPartyEntity {
                id: self.config.rp_id.clone(),
                name: self.config.rp_name.clone(),
            },
            user: UserEntity {
                id: identity.handle(),
                name: identity.as_str().to_string(),
                display_name,
            },
            supported_algorithms: CoseAlgorithm::SUPPORTED
                .iter()
                .map(|alg| CredentialParameters {
                    ty: PUBLIC_KEY_TYPE.to_string(),
                    alg: alg.id(),
                })
                .collect(),
            authenticator_selection: AuthenticatorSelection {
                authenticator_attachment: "platform".to_string(),
                resident_key: "required".to_string(),
                user_verification: self.config.user_verification,
            },
            timeout: self.timeout_ms(),
            attestation: "direct".to_string(),
        })
    }

    /// Verify a registration response and persist the identity's first
    /// credential. Fails [`PasskeyError::Conflict`] if one already exists.
    pub async fn verify_registration(
        &self,
        identity: &Identity,
        payload: &RegistrationCredential,
    ) -> Result<CredentialRecord> {
        self.complete_registration(identity, payload, false).await
    }

    /// Verify a registration response and let it replace the identity's
    /// current credential, releasing the old credential id.
    pub async fn replace_credential(
        &self,
        identity: &Identity,
        payload: &RegistrationCredential,
    ) -> Result<CredentialRecord> {
        self.complete_registration(identity, payload, true).await
    }

    async fn complete_registration(
        &self,
        identity: &Identity,
        payload: &RegistrationCredential,
        replace: bool,
    ) -> Result<CredentialRecord> {
        let result = async {
            let record = self
                .registration
                .verify_registration(identity, payload)
                .await?;
            if replace {
                self.credentials.save(&record).await?;
            } else {
                self.credentials.insert(&record).await?;
            }
            Ok::<_, PasskeyError>(record)
        }
        .await;

        match &result {
            Ok(record) => tracing::info!(
                identity = %identity,
                credential_id = %record.credential_id_b64(),
                algorithm = %record.algorithm,
                attestation = record.attestation_format.identifier(),
                replaced = replace,
                "Registration verified"
            ),
            Err(e) => log_failure("registration", identity, e),
        }
        result
    }

    /// Fails [`PasskeyError::NoCredential`] if the identity never registered.
    pub async fn issue_authentication_challenge(
        &self,
        identity: &Identity,
    ) -> Result<AuthenticationChallenge> {
        let credential = self.find_credential(identity).await?;
        let challenge = self
            .challenges
            .issue(identity, ChallengePurpose::Authentication, None)
            .await?;

        tracing::info!(identity = %identity, "Authentication challenge issued");

        Ok(AuthenticationChallenge {
            challenge: challenge.to_base64url(),
            rp_id: self.config.rp_id.clone(),
            allow_credentials: vec![CredentialDescriptor {
                ty: PUBLIC_KEY_TYPE.to_string(),
                id: credential.credential_id_b64(),
            }],
            timeout: self.timeout_ms(),
            user_verification: self.config.user_verification,
        })
    }

    pub async fn verify_authentication(
        &self,
        identity: &Identity,
        payload: &AssertionCredential,
    ) -> Result<AuthenticationOutcome> {
        let result = self.assertion.verify_assertion(identity, payload).await;

        match &result {
            Ok(outcome) => tracing::info!(
                identity = %identity,
                credential_id = %outcome.credential_id,
                sign_count = outcome.sign_count,
                counter = ?outcome.counter_status,
                "Authentication verified"
            ),
            Err(e) => log_failure("authentication", identity, e),
        }
        result
    }

    pub async fn flow_state(&self, identity: &Identity) -> Result<FlowState> {
        Ok(match self.challenges.peek(identity).await? {
            Some(pending) => FlowState::ChallengeIssued(pending.purpose),
            None => FlowState::Idle,
        })
    }

    /// The identity's credential, or [`PasskeyError::NoCredential`].
    pub async fn find_credential(&self, identity: &Identity) -> Result<CredentialRecord> {
        self.credentials.find(identity).await.map_err(|e| match e {
            PasskeyError::NotFound(_) => {
                PasskeyError::NoCredential(format!("{identity} has no registered credential"))
            }
            other => other,
        })
    }

    /// Physically remove expired entries from the backing store.
    pub async fn purge_expired(&self) -> Result<usize> {
        Ok(self.store.purge_expired().await?)
    }

    pub async fn health_check(&self) -> Result<()> {
        Ok(self.store.health_check().await?)
    }
}

impl std::fmt::Debug for RelyingParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelyingParty")
            .field("rp_id", &self.config.rp_id)
            .field("origins", &self.config.origins)
            .finish_non_exhaustive()
    }
}

fn log_failure(ceremony: &'static str, identity: &Identity, error: &PasskeyError) {
    match error {
        PasskeyError::StorageUnavailable(_) => tracing::error!(
            identity = %identity,
            ceremony,
            error = %error,
            "Verification aborted by storage failure"
        ),
        PasskeyError::ReplayDetected { .. } | PasskeyError::SignatureInvalid(_) => {
            tracing::warn!(
                identity = %identity,
                ceremony,
                kind = %error.kind(),
                error = %error,
                "Verification failed"
            )
        }
        _ => tracing::info!(
            identity = %identity,
            ceremony,
            kind = %error.kind(),
            "Verification failed"
        ),
    }
}
