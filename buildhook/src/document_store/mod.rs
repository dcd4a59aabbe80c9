pub mod firestore;
pub mod sqlite;

use crate::credentials::TokenSource;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use strum::{Display, EnumString};

/// Represents different document store failure possibilities.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DocumentStoreError {
    #[error("could not establish connection to document store; {0}")]
    Connection(String),

    #[error("not permitted to write document; {0}")]
    Permission(String),

    /// Failed to start due to misconfigured settings, usually from a misconfigured settings file.
    #[error("could not init document store; {0}")]
    FailedPrecondition(String),

    #[error("could not encode document; {0}")]
    Serialization(String),

    #[error("unexpected document store error occurred; {0}")]
    Unknown(String),
}

/// Stores JSON documents addressed by collection and key.
#[async_trait]
pub trait DocumentStore: Debug + Send + Sync + 'static {
    /// Writes `document` under `key`, replacing whatever was stored there before.
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        document: &serde_json::Value,
    ) -> Result<(), DocumentStoreError>;
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Engine {
    #[default]
    Sqlite,
    Firestore,
}

pub async fn new(
    config: &crate::conf::DocumentStore,
    project_id: &str,
    client: reqwest::Client,
    tokens: Arc<TokenSource>,
) -> Result<Arc<dyn DocumentStore>, DocumentStoreError> {
    match config.engine {
        Engine::Sqlite => {
            let Some(settings) = &config.sqlite else {
                return Err(DocumentStoreError::FailedPrecondition(
                    "Sqlite engine settings not found in config".into(),
                ));
            };

            let engine = sqlite::Engine::new(settings).await?;
            Ok(Arc::new(engine))
        }
        Engine::Firestore => {
            if project_id.is_empty() {
                return Err(DocumentStoreError::FailedPrecondition(
                    "'general.project_id' must be set to use firestore".into(),
                ));
            }

            let settings = config.firestore.clone().unwrap_or_default();
            let engine = firestore::Engine::new(&settings, project_id, client, tokens)?;
            Ok(Arc::new(engine))
        }
    }
}
