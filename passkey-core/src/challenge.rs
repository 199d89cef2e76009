//! Single-use challenges
//!
//! Each identity holds at most one live challenge, stored under
//! `challenge:{identity}` with a TTL. Consumption is an atomic take, so of
//! any number of concurrent verifications for one identity exactly one gets
//! the challenge and the rest see [`PasskeyError::NotFound`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::encoding;
use crate::error::{PasskeyError, Result};
use crate::identity::Identity;
use crate::storage::{decode_record, encode_record, KeyValueStore, StorageError};

/// Fewest random bytes a challenge may carry.
pub const MIN_CHALLENGE_BYTES: usize = 16;

/// Random challenge bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge(#[serde(with = "encoding::serde_bytes")] Vec<u8>);

impl Challenge {
    /// Fresh challenge of `length` bytes from the OS CSPRNG.
    pub fn generate(length: usize) -> Self {
        let mut bytes = vec![0u8; length.max(MIN_CHALLENGE_BYTES)];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Parse the base64url form handed to clients.
    pub fn from_base64url(value: &str) -> Result<Self> {
        encoding::decode("challenge", value).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        encoding::encode(&self.0)
    }
}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Challenge({} bytes)", self.0.len())
    }
}

/// Which ceremony a challenge was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePurpose {
    Registration,
    Authentication,
}

impl std::fmt::Display for ChallengePurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registration => f.write_str("registration"),
            Self::Authentication => f.write_str("authentication"),
        }
    }
}

/// Stored form of an outstanding challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChallenge {
    pub challenge: Challenge,
    pub purpose: ChallengePurpose,
    /// Display name requested at registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingChallenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Issues and consumes per-identity challenges over a [`KeyValueStore`].
#[derive(Clone)]
pub struct ChallengeStore {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    length: usize,
    allow_overwrite: bool,
}

impl ChallengeStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        ttl: Duration,
        length: usize,
        allow_overwrite: bool,
    ) -> Self {
        Self {
            store,
            ttl,
            length: length.max(MIN_CHALLENGE_BYTES),
            allow_overwrite,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(identity: &Identity) -> String {
        format!("challenge:{identity}")
    }

    /// Mint a challenge for `identity` and store it with the configured TTL.
    ///
    /// With overwrite allowed, a live challenge for the identity is replaced.
    /// Otherwise issuing while one is live fails [`PasskeyError::Conflict`].
    pub async fn issue(
        &self,
        identity: &Identity,
        purpose: ChallengePurpose,
        display_name: Option<String>,
    ) -> Result<Challenge> {
        let key = Self::key(identity);
        let issued_at = Utc::now();
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        let pending = PendingChallenge {
            challenge: Challenge::generate(self.length),
            purpose,
            display_name,
            issued_at,
            expires_at: issued_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        let bytes = encode_record(&pending)?;

        if self.allow_overwrite {
            if let Some(previous) = self.peek(identity).await? {
                tracing::warn!(
                    identity = %identity,
                    superseded = %previous.purpose,
                    purpose = %purpose,
                    "Overwriting outstanding challenge"
                );
            }
            self.store.set(&key, bytes, Some(self.ttl)).await?;
        } else {
            match self
                .store
                .compare_and_set(&key, None, bytes, Some(self.ttl))
                .await
            {
                Ok(()) => {}
                Err(StorageError::Conflict(_)) => {
                    return Err(PasskeyError::Conflict(format!(
                        "a challenge is already outstanding for {identity}"
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(identity = %identity, purpose = %purpose, "Challenge issued");
        Ok(pending.challenge)
    }

    /// Atomically retrieve and delete the challenge for `identity`.
    ///
    /// Fails [`PasskeyError::NotFound`] when none is stored or it has expired.
    pub async fn consume(&self, identity: &Identity) -> Result<PendingChallenge> {
        let not_found = || PasskeyError::NotFound(format!("no live challenge for {identity}"));

        let bytes = self
            .store
            .take(&Self::key(identity))
            .await?
            .ok_or_else(not_found)?;
        let pending: PendingChallenge = decode_record(&bytes)?;

        // Backends may expire lazily; the record's own deadline is authoritative.
        if pending.is_expired(Utc::now()) {
            return Err(not_found());
        }

        tracing::debug!(identity = %identity, purpose = %pending.purpose, "Challenge consumed");
        Ok(pending)
    }

    /// [`consume`](Self::consume) for a verification step: an absent or
    /// expired challenge surfaces as [`PasskeyError::ChallengeMissingOrExpired`].
    pub async fn consume_outstanding(&self, identity: &Identity) -> Result<PendingChallenge> {
        self.consume(identity).await.map_err(|e| match e {
            PasskeyError::NotFound(_) => PasskeyError::ChallengeMissingOrExpired,
            other => other,
        })
    }

    /// Non-consuming lookup of the live challenge.
    pub async fn peek(&self, identity: &Identity) -> Result<Option<PendingChallenge>> {
        let Some(bytes) = self.store.get(&Self::key(identity)).await? else {
            return Ok(None);
        };
        let pending: PendingChallenge = decode_record(&bytes)?;
        Ok((!pending.is_expired(Utc::now())).then_some(pending))
    }
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("ttl", &self.ttl)
            .field("length", &self.length)
            .field("allow_overwrite", &self.allow_overwrite)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn store(ttl: Duration, allow_overwrite: bool) -> ChallengeStore {
        ChallengeStore::new(Arc::new(MemoryStore::new()), ttl, 32, allow_overwrite)
    }

    fn alice() -> Identity {
        Identity::parse("alice").unwrap()
    }

    #[test]
    fn test_generate_respects_minimum_length() {
        assert_eq!(Challenge::generate(4).as_bytes().len(), MIN_CHALLENGE_BYTES);
        assert_eq!(Challenge::generate(48).as_bytes().len(), 48);
        assert_ne!(Challenge::generate(32), Challenge::generate(32));
    }

    #[tokio::test]
    async fn test_issue_then_consume_once() {
        let challenges = store(Duration::from_secs(60), true);
        let issued = challenges
            .issue(&alice(), ChallengePurpose::Registration, Some("Alice".into()))
            .await
            .unwrap();

        let pending = challenges.consume(&alice()).await.unwrap();
        assert_eq!(pending.challenge, issued);
        assert_eq!(pending.purpose, ChallengePurpose::Registration);
        assert_eq!(pending.display_name.as_deref(), Some("Alice"));

        assert!(matches!(
            challenges.consume(&alice()).await,
            Err(PasskeyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_challenge_fails_consume() {
        let challenges = store(Duration::from_millis(20), true);
        challenges
            .issue(&alice(), ChallengePurpose::Authentication, None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(challenges.peek(&alice()).await.unwrap().is_none());
        assert!(matches!(
            challenges.consume(&alice()).await,
            Err(PasskeyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reissue_overwrites_when_allowed() {
        let challenges = store(Duration::from_secs(60), true);
        let first = challenges
            .issue(&alice(), ChallengePurpose::Registration, None)
            .await
            .unwrap();
        let second = challenges
            .issue(&alice(), ChallengePurpose::Authentication, None)
            .await
            .unwrap();
        assert_ne!(first, second);

        let pending = challenges.consume(&alice()).await.unwrap();
        assert_eq!(pending.challenge, second);
        assert_eq!(pending.purpose, ChallengePurpose::Authentication);
    }

    #[tokio::test]
    async fn test_reissue_conflicts_when_overwrite_disabled() {
        let challenges = store(Duration::from_secs(60), false);
        let first = challenges
            .issue(&alice(), ChallengePurpose::Registration, None)
            .await
            .unwrap();
        assert!(matches!(
            challenges
                .issue(&alice(), ChallengePurpose::Authentication, None)
                .await,
            Err(PasskeyError::Conflict(_))
        ));

        // The original challenge survives the rejected issuance
        assert_eq!(challenges.consume(&alice()).await.unwrap().challenge, first);

        // Once consumed, a new one may be issued
        challenges
            .issue(&alice(), ChallengePurpose::Authentication, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let challenges = store(Duration::from_secs(60), false);
        let bob = Identity::parse("bob").unwrap();
        challenges
            .issue(&alice(), ChallengePurpose::Registration, None)
            .await
            .unwrap();
        challenges
            .issue(&bob, ChallengePurpose::Registration, None)
            .await
            .unwrap();
        challenges.consume(&alice()).await.unwrap();
        challenges.consume(&bob).await.unwrap();
    }
}
