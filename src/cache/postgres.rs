//! Postgres cache backend
//!
//! One row per query in `query_response_cache`, keyed by the SHA-256 of the
//! raw query text. The table is created on first use.

use super::CacheBackend;
use crate::error::SearchError;
use crate::models::CachedAnswer;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

pub struct PostgresCache {
    pool: PgPool,
    ttl: Duration,
    schema_ready: OnceCell<()>,
}

impl PostgresCache {
    /// Builds the pool without connecting; the first query opens connections.
    pub fn connect_lazy(database_url: &str, ttl: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| SearchError::DatabaseError(format!("Invalid cache database URL: {}", e)))?;

        Ok(Self {
            pool,
            ttl,
            schema_ready: OnceCell::new(),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS query_response_cache (
                      cache_key TEXT PRIMARY KEY,
                      query TEXT NOT NULL,
                      payload TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      expires_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_query_response_cache_expiry
                    ON query_response_cache (expires_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                SearchError::DatabaseError(format!("Failed to initialize response cache schema: {}", e))
            })?;

        Ok(())
    }
}

/// Row key for a query: lowercase hex SHA-256 of the exact text.
pub fn cache_key(query: &str) -> String {
    hex::encode(Sha256::digest(query.as_bytes()))
}

/// A row written by an older payload layout reads as a cache error, which
/// the front treats as a miss.
fn decode_payload(payload: &str) -> Result<CachedAnswer> {
    serde_json::from_str(payload)
        .map_err(|e| SearchError::CacheError(format!("Stored answer could not be decoded: {}", e)))
}

#[async_trait]
impl CacheBackend for PostgresCache {
    async fn get(&self, query: &str) -> Result<Option<CachedAnswer>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT payload FROM query_response_cache WHERE cache_key = $1 AND expires_at > NOW()",
        )
        .bind(cache_key(query))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SearchError::DatabaseError(format!("Failed to read cached answer: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: String = row
            .try_get("payload")
            .map_err(|e| SearchError::DatabaseError(format!("Malformed cache row: {}", e)))?;
        decode_payload(&payload).map(Some)
    }

    async fn set(&self, query: &str, answer: &CachedAnswer) -> Result<()> {
        self.ensure_schema().await?;

        let payload = serde_json::to_string(answer)?;
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        let expires_at = Utc::now() + ttl;

        sqlx::query(
            r#"
            INSERT INTO query_response_cache (cache_key, query, payload, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (cache_key)
            DO UPDATE SET payload = EXCLUDED.payload, created_at = NOW(), expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(cache_key(query))
        .bind(query)
        .bind(payload)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SearchError::DatabaseError(format!("Failed to write cached answer: {}", e)))?;

        debug!("Cached answer stored in postgres");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_sha256_hex() {
        assert_eq!(
            cache_key(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(cache_key("What is TSLA at?").len(), 64);
        assert_ne!(cache_key("What is TSLA at?"), cache_key("what is tsla at?"));
    }

    #[test]
    fn test_undecodable_payload_is_cache_error() {
        assert!(matches!(decode_payload("{\"answer\": 42"), Err(SearchError::CacheError(_))));
        assert!(matches!(decode_payload("\"plain text\""), Err(SearchError::CacheError(_))));
    }

    #[tokio::test]
    async fn test_bad_url_is_database_error() {
        let result = PostgresCache::connect_lazy("not a url", Duration::from_secs(60));
        assert!(matches!(result, Err(SearchError::DatabaseError(_))));
    }
}
