//! Registration (attestation) verification

use chrono::Utc;

use crate::attestation::AttestationObject;
use crate::challenge::ChallengeStore;
use crate::client_data::{client_data_hash, ClientDataType};
use crate::config::VerificationPolicy;
use crate::credential::CredentialRecord;
use crate::error::{PasskeyError, Result};
use crate::identity::Identity;
use crate::payload::RegistrationCredential;

/// Validates attestation responses against outstanding challenges.
#[derive(Debug, Clone)]
pub struct RegistrationVerifier {
    challenges: ChallengeStore,
    policy: VerificationPolicy,
}

impl RegistrationVerifier {
    pub fn new(challenges: ChallengeStore, policy: VerificationPolicy) -> Self {
        Self { challenges, policy }
    }

    /// Verify `payload` for `identity` and assemble the credential record.
    ///
    /// The outstanding challenge is consumed first, so every outcome,
    /// including a malformed payload, invalidates it. The returned record is
    /// not persisted.
    pub async fn verify_registration(
        &self,
        identity: &Identity,
        payload: &RegistrationCredential,
    ) -> Result<CredentialRecord> {
        let pending = self.challenges.consume_outstanding(identity).await?;

        let decoded = payload.decode()?;
        let client_data = &decoded.client_data;
        client_data.check_challenge(&pending.challenge)?;
        client_data.check_type(ClientDataType::Create)?;
        client_data.check_origin(&self.policy.origins)?;

        let attestation = AttestationObject::parse(&decoded.attestation_object)?;
        let auth_data = &attestation.auth_data;
        auth_data.check(
            &self.policy.rp_id_hash,
            self.policy.require_user_verification,
        )?;

        let attested = auth_data
            .attested_credential
            .as_ref()
            .ok_or_else(|| PasskeyError::malformed("attested credential data missing"))?;
        if attested.credential_id != decoded.raw_id {
            return Err(PasskeyError::malformed(
                "credential id in authenticator data does not match rawId",
            ));
        }
        let algorithm = attested.public_key.algorithm();

        let attestation_type =
            attestation.verify_statement(&client_data_hash(&decoded.client_data_json))?;

        Ok(CredentialRecord {
            identity: identity.clone(),
            credential_id: attested.credential_id.clone(),
            public_key: attested.public_key_cbor.clone(),
            algorithm,
            sign_count: auth_data.sign_count,
            display_name: pending
                .display_name
                .unwrap_or_else(|| identity.as_str().to_string()),
            aaguid: attested.aaguid.to_vec(),
            attestation_format: attestation.format,
            attestation_type,
            transports: decoded.transports,
            user_verified: auth_data.flags.user_verified(),
            backup_eligible: auth_data.flags.backup_eligible(),
            backed_up: auth_data.flags.backed_up(),
            created_at: Utc::now(),
            last_used_at: None,
        })
    }
}
