use super::{DocumentStore, DocumentStoreError};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{
    migrate,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    Pool, Sqlite, SqlitePool,
};
use std::str::FromStr;
use tracing::debug;

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path of the database file; created if missing.
    pub path: String,
}

fn map_sqlx_error(e: sqlx::Error) -> DocumentStoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            DocumentStoreError::Connection(e.to_string())
        }
        _ => DocumentStoreError::Unknown(e.to_string()),
    }
}

/// A local document store kept in a single sqlite table.
#[derive(Debug, Clone)]
pub struct Engine {
    pool: Pool<Sqlite>,
}

impl Engine {
    pub async fn new(config: &Config) -> Result<Self, DocumentStoreError> {
        if let Some(parent) = std::path::Path::new(&config.path).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DocumentStoreError::FailedPrecondition(format!(
                    "could not create directory for '{}'; {e}",
                    config.path
                ))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.path))
            .map_err(|e| DocumentStoreError::FailedPrecondition(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| DocumentStoreError::Connection(e.to_string()))?;

        migrate!("src/document_store/migrations")
            .run(&pool)
            .await
            .map_err(|e| DocumentStoreError::FailedPrecondition(e.to_string()))?;

        debug!(path = %config.path, "Opened sqlite document store");

        Ok(Engine { pool })
    }
}

#[cfg(test)]
impl Engine {
    /// Returns the document stored under `key`, if any.
    pub async fn get(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, DocumentStoreError> {
        let body: Option<(String,)> =
            sqlx::query_as("SELECT body FROM documents WHERE collection = ? AND key = ?;")
                .bind(collection)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        body.map(|(body,)| {
            serde_json::from_str(&body).map_err(|e| DocumentStoreError::Serialization(e.to_string()))
        })
        .transpose()
    }

    pub async fn count(&self, collection: &str) -> Result<i64, DocumentStoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM documents WHERE collection = ?;")
                .bind(collection)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(count)
    }
}

#[async_trait]
impl DocumentStore for Engine {
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        document: &serde_json::Value,
    ) -> Result<(), DocumentStoreError> {
        let body = serde_json::to_string(document)
            .map_err(|e| DocumentStoreError::Serialization(e.to_string()))?;

        sqlx::query(
            "INSERT INTO documents (collection, key, body, modified) VALUES (?, ?, ?, ?) \
            ON CONFLICT (collection, key) DO UPDATE SET body = excluded.body, modified = excluded.modified;",
        )
        .bind(collection)
        .bind(key)
        .bind(body)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
