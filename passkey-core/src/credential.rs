//! Credential records and registry
//!
//! Records live under `credential:{identity}`. Global uniqueness of
//! credential ids is enforced by a second key, `credential-id:{id}`, holding
//! the owning identity and claimed with insert-if-absent.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attestation::{AttestationFormat, AttestationType};
use crate::cose::{CoseAlgorithm, CosePublicKey};
use crate::encoding;
use crate::error::{PasskeyError, Result};
use crate::identity::Identity;
use crate::storage::{decode_record, encode_record, KeyValueStore, StorageError};

/// Attempts at a contended counter update before giving up.
const MAX_CAS_ATTEMPTS: usize = 8;

/// A registered public-key credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub identity: Identity,
    #[serde(with = "encoding::serde_bytes")]
    pub credential_id: Vec<u8>,
    /// COSE_Key as registered
    #[serde(with = "encoding::serde_bytes")]
    pub public_key: Vec<u8>,
    pub algorithm: CoseAlgorithm,
    pub sign_count: u32,
    pub display_name: String,
    #[serde(with = "encoding::serde_bytes")]
    pub aaguid: Vec<u8>,
    pub attestation_format: AttestationFormat,
    pub attestation_type: AttestationType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<String>,
    pub user_verified: bool,
    pub backup_eligible: bool,
    pub backed_up: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// Unpadded base64url credential id, as exchanged with clients.
    pub fn credential_id_b64(&self) -> String {
        encoding::encode(&self.credential_id)
    }

    pub fn cose_key(&self) -> Result<CosePublicKey> {
        CosePublicKey::from_cbor(&self.public_key)
    }
}

/// How a successful counter update was treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterStatus {
    /// Counter strictly increased and was stored
    Advanced,
    /// Authenticator keeps no counter (stored and presented are both zero)
    Unsupported,
}

/// Per-identity credential store over a [`KeyValueStore`].
#[derive(Clone)]
pub struct CredentialRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn record_key(identity: &Identity) -> String {
        format!("credential:{identity}")
    }

    fn index_key(credential_id: &[u8]) -> String {
        format!("credential-id:{}", encoding::encode(credential_id))
    }

    /// Claim `credential-id:{id}` for the record's identity. Returns whether
    /// this call made the claim, as opposed to finding it already held by the
    /// same identity.
    async fn claim_id(&self, record: &CredentialRecord) -> Result<bool> {
        let index_key = Self::index_key(&record.credential_id);
        let owner = record.identity.as_str().as_bytes();

        match self
            .store
            .compare_and_set(&index_key, None, owner.to_vec(), None)
            .await
        {
            Ok(()) => Ok(true),
            Err(StorageError::Conflict(_)) => {
                if self.store.get(&index_key).await?.as_deref() == Some(owner) {
                    return Ok(false);
                }
                tracing::warn!(
                    identity = %record.identity,
                    credential_id = %record.credential_id_b64(),
                    "Credential id already registered to another identity"
                );
                Err(PasskeyError::Conflict(format!(
                    "credential {} is registered to another identity",
                    record.credential_id_b64()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the id claim if `identity` still holds it.
    async fn release_id(&self, credential_id: &[u8], identity: &Identity) -> Result<()> {
        let key = Self::index_key(credential_id);
        if self.store.get(&key).await?.as_deref() == Some(identity.as_str().as_bytes()) {
            self.store.delete(&key).await?;
        }
        Ok(())
    }

    /// Undo a claim made for a write that then failed.
    async fn abandon_claim(&self, record: &CredentialRecord, claimed: bool) {
        if !claimed {
            return;
        }
        if let Err(e) = self.release_id(&record.credential_id, &record.identity).await {
            tracing::warn!(
                identity = %record.identity,
                credential_id = %record.credential_id_b64(),
                error = %e,
                "Failed to release credential id claim"
            );
        }
    }

    /// Store the first credential for `record.identity`.
    ///
    /// Fails [`PasskeyError::Conflict`] if the identity already has a
    /// credential or the credential id belongs to another identity.
    pub async fn insert(&self, record: &CredentialRecord) -> Result<()> {
        let identity = &record.identity;
        let value = encode_record(record)?;
        let claimed = self.claim_id(record).await?;

        let written = self
            .store
            .compare_and_set(&Self::record_key(identity), None, value, None)
            .await;
        if let Err(e) = written {
            self.abandon_claim(record, claimed).await;
            return Err(match e {
                StorageError::Conflict(_) => PasskeyError::Conflict(format!(
                    "{identity} already has a registered credential"
                )),
                other => other.into(),
            });
        }

        tracing::info!(
            identity = %identity,
            credential_id = %record.credential_id_b64(),
            algorithm = %record.algorithm,
            sign_count = record.sign_count,
            "Credential saved"
        );
        Ok(())
    }

    /// Insert or replace the credential for `record.identity`.
    ///
    /// Fails [`PasskeyError::Conflict`] if the credential id already belongs
    /// to another identity. A replaced credential's id is released.
    pub async fn save(&self, record: &CredentialRecord) -> Result<()> {
        let identity = &record.identity;
        let value = encode_record(record)?;
        let claimed = self.claim_id(record).await?;

        let written = async {
            let previous = self.find_optional(identity).await?;
            self.store
                .set(&Self::record_key(identity), value, None)
                .await?;
            Ok::<_, PasskeyError>(previous)
        }
        .await;
        let previous = match written {
            Ok(previous) => previous,
            Err(e) => {
                self.abandon_claim(record, claimed).await;
                return Err(e);
            }
        };

        if let Some(previous) = previous {
            if previous.credential_id != record.credential_id {
                self.release_id(&previous.credential_id, identity).await?;
                tracing::info!(
                    identity = %identity,
                    credential_id = %previous.credential_id_b64(),
                    "Replaced credential released"
                );
            }
        }

        tracing::info!(
            identity = %identity,
            credential_id = %record.credential_id_b64(),
            algorithm = %record.algorithm,
            sign_count = record.sign_count,
            "Credential saved"
        );
        Ok(())
    }

    /// Fails [`PasskeyError::NotFound`] if the identity has no credential.
    pub async fn find(&self, identity: &Identity) -> Result<CredentialRecord> {
        self.find_optional(identity)
            .await?
            .ok_or_else(|| PasskeyError::NotFound(format!("no credential for {identity}")))
    }

    pub async fn find_optional(&self, identity: &Identity) -> Result<Option<CredentialRecord>> {
        match self.store.get(&Self::record_key(identity)).await? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Identity owning `credential_id`, if any.
    pub async fn owner_of(&self, credential_id: &[u8]) -> Result<Option<Identity>> {
        let Some(owner) = self.store.get(&Self::index_key(credential_id)).await? else {
            return Ok(None);
        };
        let owner = String::from_utf8(owner)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Identity::parse(owner).map(Some)
    }

    /// Record a successful authentication reporting `new_counter`.
    ///
    /// - stored 0, presented 0: counter unsupported, only `last_used_at` moves
    /// - presented <= stored otherwise: [`PasskeyError::ReplayDetected`], nothing written
    /// - otherwise the counter is stored
    ///
    /// The update is a compare-and-set on the whole record, retried when a
    /// concurrent writer got there first.
    pub async fn bump_counter(&self, identity: &Identity, new_counter: u32) -> Result<CounterStatus> {
        let key = Self::record_key(identity);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| PasskeyError::NotFound(format!("no credential for {identity}")))?;
            let mut record: CredentialRecord = decode_record(&current)?;

            let status = match (record.sign_count, new_counter) {
                (0, 0) => CounterStatus::Unsupported,
                (stored, presented) if presented <= stored => {
                    tracing::warn!(
                        identity = %identity,
                        stored,
                        presented,
                        "Signature counter did not advance, possible cloned authenticator"
                    );
                    return Err(PasskeyError::ReplayDetected { stored, presented });
                }
                _ => CounterStatus::Advanced,
            };

            record.sign_count = new_counter;
            record.last_used_at = Some(Utc::now());

            match self
                .store
                .compare_and_set(&key, Some(&current), encode_record(&record)?, None)
                .await
            {
                Ok(()) => {
                    tracing::debug!(
                        identity = %identity,
                        sign_count = new_counter,
                        status = ?status,
                        "Signature counter updated"
                    );
                    return Ok(status);
                }
                Err(StorageError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(PasskeyError::Conflict(format!(
            "counter update for {identity} kept conflicting"
        )))
    }
}

impl std::fmt::Debug for CredentialRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRegistry").finish_non_exhaustive()
    }
}
