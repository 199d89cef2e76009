//! Assertion verification
//!
//! The signed message is `authenticatorData || SHA-256(clientDataJSON)`,
//! verified with the stored COSE key under the stored algorithm. A verified
//! assertion then has to advance the signature counter.

use serde::Serialize;

use crate::authenticator_data::AuthenticatorData;
use crate::challenge::ChallengeStore;
use crate::client_data::{client_data_hash, ClientDataType};
use crate::config::VerificationPolicy;
use crate::credential::{CounterStatus, CredentialRegistry};
use crate::encoding;
use crate::error::{PasskeyError, Result};
use crate::identity::Identity;
use crate::payload::AssertionCredential;

/// Result of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOutcome {
    pub identity: Identity,
    /// Unpadded base64url credential id
    pub credential_id: String,
    pub sign_count: u32,
    pub counter_status: CounterStatus,
    pub user_verified: bool,
    pub backed_up: bool,
}

/// Validates signed assertions against stored credentials.
#[derive(Debug, Clone)]
pub struct AssertionVerifier {
    challenges: ChallengeStore,
    credentials: CredentialRegistry,
    policy: VerificationPolicy,
}

impl AssertionVerifier {
    pub fn new(
        challenges: ChallengeStore,
        credentials: CredentialRegistry,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            challenges,
            credentials,
            policy,
        }
    }

    pub async fn verify_assertion(
        &self,
        identity: &Identity,
        payload: &AssertionCredential,
    ) -> Result<AuthenticationOutcome> {
        let Some(credential) = self.credentials.find_optional(identity).await? else {
            // Still invalidate whatever challenge is outstanding
            match self.challenges.consume(identity).await {
                Ok(_) | Err(PasskeyError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            return Err(PasskeyError::NoCredential(format!(
                "{identity} has no registered credential"
            )));
        };

        let pending = self.challenges.consume_outstanding(identity).await?;

        let decoded = payload.decode()?;
        if decoded.raw_id != credential.credential_id {
            return Err(PasskeyError::NoCredential(format!(
                "credential {} is not registered to {identity}",
                encoding::encode(&decoded.raw_id)
            )));
        }
        if let Some(handle) = &decoded.user_handle {
            if handle.as_slice() != identity.as_str().as_bytes() {
                return Err(PasskeyError::NoCredential(format!(
                    "user handle does not belong to {identity}"
                )));
            }
        }

        let client_data = &decoded.client_data;
        client_data.check_challenge(&pending.challenge)?;
        client_data.check_type(ClientDataType::Get)?;
        client_data.check_origin(&self.policy.origins)?;

        let auth_data = AuthenticatorData::parse(&decoded.authenticator_data)?;
        auth_data.check(
            &self.policy.rp_id_hash,
            self.policy.require_user_verification,
        )?;

        let mut message = decoded.authenticator_data;
        message.extend_from_slice(&client_data_hash(&decoded.client_data_json));
        credential
            .cose_key()?
            .verify(credential.algorithm, &message, &decoded.signature)?;

        let counter_status = self
            .credentials
            .bump_counter(identity, auth_data.sign_count)
            .await?;
        if counter_status == CounterStatus::Unsupported {
            tracing::debug!(
                identity = %identity,
                credential_id = %credential.credential_id_b64(),
                "Authenticator does not implement a signature counter"
            );
        }

        Ok(AuthenticationOutcome {
            identity: identity.clone(),
            credential_id: credential.credential_id_b64(),
            sign_count: auth_data.sign_count,
            counter_status,
            user_verified: auth_data.flags.user_verified(),
            backed_up: auth_data.flags.backed_up(),
        })
    }
}
