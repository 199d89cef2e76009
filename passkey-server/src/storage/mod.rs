//! Storage backend selection
//!
//! PostgreSQL when `DATABASE_URL` is configured, otherwise the in-memory store
//! from `passkey-core`.

pub mod postgres;

pub use postgres::PostgresStore;

use std::sync::Arc;

use passkey_core::{KeyValueStore, MemoryStore, StorageResult};

use crate::config::Config;

/// Open the configured key-value backend.
pub async fn open(config: &Config) -> StorageResult<Arc<dyn KeyValueStore>> {
    match &config.database_url {
        Some(url) => {
            tracing::info!("Using PostgreSQL key-value storage");
            let store = PostgresStore::connect(
                url,
                config.database_max_connections,
                config.database_min_connections,
            )
            .await?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
