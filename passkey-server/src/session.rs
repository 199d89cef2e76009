//! Session storage
//!
//! Sessions are managed by `tower-sessions`: the layer owns the cookie and
//! hands handlers a [`Session`](tower_sessions::Session). Records are kept in
//! the same [`KeyValueStore`] as the engine, under `session:{id}`, with the
//! record's expiry as the entry TTL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use passkey_core::{Identity, KeyValueStore, StorageError};
use time::OffsetDateTime;
use tower_sessions::cookie::SameSite;
use tower_sessions::session::{Id, Record};
use tower_sessions::session_store::{self, SessionStore};
use tower_sessions::{Expiry, Session, SessionManagerLayer};

use crate::config::Config;

/// Cookie carrying the session id
pub const SESSION_COOKIE: &str = "session";

/// Session data key holding the signed-in [`Identity`]
pub const IDENTITY_KEY: &str = "identity";

/// Browsers cap cookie lifetimes at 400 days.
const MAX_SESSION_TTL_SECS: u64 = 400 * 24 * 60 * 60;

/// `tower-sessions` store over the shared key-value backend
#[derive(Clone)]
pub struct KvSessionStore {
    store: Arc<dyn KeyValueStore>,
}

impl KvSessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(id: &Id) -> String {
        format!("session:{id}")
    }

    fn ttl(record: &Record) -> Duration {
        let remaining = record.expiry_date - OffsetDateTime::now_utc();
        Duration::try_from(remaining).unwrap_or(Duration::ZERO)
    }

    fn encode(record: &Record) -> session_store::Result<Vec<u8>> {
        serde_json::to_vec(record).map_err(|e| session_store::Error::Encode(e.to_string()))
    }
}

fn backend(e: StorageError) -> session_store::Error {
    session_store::Error::Backend(e.to_string())
}

#[async_trait]
impl SessionStore for KvSessionStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        // Insert-if-absent, drawing a fresh id on collision
        loop {
            let value = Self::encode(record)?;
            match self
                .store
                .compare_and_set(&Self::key(&record.id), None, value, Some(Self::ttl(record)))
                .await
            {
                Ok(()) => return Ok(()),
                Err(StorageError::Conflict(_)) => record.id = Id::default(),
                Err(e) => return Err(backend(e)),
            }
        }
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        self.store
            .set(&Self::key(&record.id), Self::encode(record)?, Some(Self::ttl(record)))
            .await
            .map_err(backend)
    }

    async fn load(&self, id: &Id) -> session_store::Result<Option<Record>> {
        match self.store.get(&Self::key(id)).await.map_err(backend)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| session_store::Error::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &Id) -> session_store::Result<()> {
        self.store
            .delete(&Self::key(id))
            .await
            .map(|_| ())
            .map_err(backend)
    }
}

impl std::fmt::Debug for KvSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvSessionStore").finish_non_exhaustive()
    }
}

/// Session layer: `HttpOnly`, `SameSite=Lax` cookie named [`SESSION_COOKIE`],
/// expiring after `SESSION_TTL_SECS` of inactivity.
pub fn session_layer(
    config: &Config,
    store: Arc<dyn KeyValueStore>,
) -> SessionManagerLayer<KvSessionStore> {
    let ttl = config.session_ttl().as_secs().min(MAX_SESSION_TTL_SECS);
    SessionManagerLayer::new(KvSessionStore::new(store))
        .with_name(SESSION_COOKIE)
        .with_http_only(true)
        .with_same_site(SameSite::Lax)
        .with_secure(config.cookie_secure)
        .with_expiry(Expiry::OnInactivity(time::Duration::seconds(ttl as i64)))
}

/// Identity signed in on `session`, if any.
pub async fn current_identity(
    session: &Session,
) -> Result<Option<Identity>, tower_sessions::session::Error> {
    session.get(IDENTITY_KEY).await
}

/// Sign `identity` in, under a fresh session id.
pub async fn sign_in(
    session: &Session,
    identity: &Identity,
) -> Result<(), tower_sessions::session::Error> {
    session.cycle_id().await?;
    session.insert(IDENTITY_KEY, identity).await?;
    tracing::debug!(identity = %identity, "Session started");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use passkey_core::MemoryStore;

    fn record(expires_in: time::Duration) -> Record {
        Record {
            id: Id::default(),
            data: HashMap::from([(IDENTITY_KEY.to_string(), serde_json::json!("alice"))]),
            expiry_date: OffsetDateTime::now_utc() + expires_in,
        }
    }

    #[tokio::test]
    async fn test_create_load_delete() {
        let store = KvSessionStore::new(Arc::new(MemoryStore::new()));
        let mut record = record(time::Duration::minutes(5));
        store.create(&mut record).await.unwrap();

        let loaded = store.load(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.data[IDENTITY_KEY], "alice");

        store.delete(&record.id).await.unwrap();
        assert!(store.load(&record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_draws_new_id_on_collision() {
        let store = KvSessionStore::new(Arc::new(MemoryStore::new()));
        let mut first = record(time::Duration::minutes(5));
        store.create(&mut first).await.unwrap();

        let mut second = record(time::Duration::minutes(5));
        second.id = first.id;
        store.create(&mut second).await.unwrap();

        assert_ne!(second.id, first.id);
        assert!(store.load(&first.id).await.unwrap().is_some());
        assert!(store.load(&second.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_record_is_not_loaded() {
        let store = KvSessionStore::new(Arc::new(MemoryStore::new()));
        let record = record(time::Duration::seconds(-1));
        store.save(&record).await.unwrap();
        assert!(store.load(&record.id).await.unwrap().is_none());
    }
}
