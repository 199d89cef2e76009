//! PostgreSQL key-value store
//!
//! One table, `kv_entries(key, value, expires_at)`. Every trait method is a
//! single statement, so atomicity per key comes from PostgreSQL row locking:
//! `take` is `DELETE ... RETURNING`, insert-if-absent is an upsert that only
//! overwrites expired rows, update-if-unchanged is a conditional `UPDATE`.
//! Expiry is compared against the database clock (`NOW()`).

use std::time::Duration;

use async_trait::async_trait;
use passkey_core::{KeyValueStore, StorageError, StorageResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// PostgreSQL-backed [`KeyValueStore`]
pub struct PostgresStore {
    pool: PgPool,
}

/// TTL as fractional milliseconds for `$n::float8 * INTERVAL '1 millisecond'`.
/// `NULL` propagates to a `NULL` expiry, i.e. never expires.
fn ttl_millis(ttl: Option<Duration>) -> Option<f64> {
    ttl.map(|ttl| ttl.as_secs_f64() * 1000.0)
}

fn query_error(e: sqlx::Error) -> StorageError {
    StorageError::Query(e.to_string())
}

impl PostgresStore {
    /// Connect to PostgreSQL and run pending migrations.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!(
            max_connections,
            min_connections,
            "Connected to PostgreSQL database"
        );

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for PostgresStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        sqlx::query_scalar::<_, Vec<u8>>(
            r#"
            SELECT value FROM kv_entries
            WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES ($1, $2, NOW() + $3::float8 * INTERVAL '1 millisecond')
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ttl_millis(ttl))
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let live = sqlx::query_scalar::<_, bool>(
            r#"
            DELETE FROM kv_entries WHERE key = $1
            RETURNING (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(live.unwrap_or(false))
    }

    async fn take(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let row = sqlx::query_as::<_, (Vec<u8>, bool)>(
            r#"
            DELETE FROM kv_entries WHERE key = $1
            RETURNING value, (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(row.and_then(|(value, live)| live.then_some(value)))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        let result = match expected {
            None => sqlx::query(
                r#"
                INSERT INTO kv_entries (key, value, expires_at)
                VALUES ($1, $2, NOW() + $3::float8 * INTERVAL '1 millisecond')
                ON CONFLICT (key) DO UPDATE SET
                    value = EXCLUDED.value,
                    expires_at = EXCLUDED.expires_at
                WHERE kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= NOW()
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(ttl_millis(ttl))
            .execute(&self.pool)
            .await,
            Some(expected) => sqlx::query(
                r#"
                UPDATE kv_entries
                SET value = $2, expires_at = NOW() + $3::float8 * INTERVAL '1 millisecond'
                WHERE key = $1
                  AND value = $4
                  AND (expires_at IS NULL OR expires_at > NOW())
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(ttl_millis(ttl))
            .bind(expected)
            .execute(&self.pool)
            .await,
        }
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(key.to_string()));
        }
        Ok(())
    }

    async fn purge_expired(&self) -> StorageResult<usize> {
        let result = sqlx::query(
            "DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= NOW()",
        )
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() as usize)
    }

    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool", &"<PgPool>")
            .finish()
    }
}
