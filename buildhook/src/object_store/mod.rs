pub mod filesystem;
pub mod gcs;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;
use strum::{Display, EnumString};

pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<Bytes, ObjectStoreError>> + Send>>;

/// Represents different object store failure possibilities.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("could not establish connection to object store; {0}")]
    Connection(String),

    #[error("requested object not found")]
    NotFound,

    #[error("unexpected object store error occurred; {0}")]
    Internal(String),

    /// Failed to start due to misconfigured settings, usually from a misconfigured settings file.
    #[error("could not init object store; {0}")]
    FailedPrecondition(String),
}

impl From<object_store::Error> for ObjectStoreError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => ObjectStoreError::NotFound,
            object_store::Error::Generic { store, source } => {
                ObjectStoreError::Connection(format!("{store}: {source}"))
            }
            _ => ObjectStoreError::Internal(err.to_string()),
        }
    }
}

/// Access to objects addressed by container (bucket) and key.
#[async_trait]
pub trait ObjectStore: Debug + Send + Sync + 'static {
    /// Returns the object's content as a stream of chunks so large archives never have to be held
    /// in memory.
    async fn get_stream(&self, container: &str, key: &str) -> Result<ObjectStream, ObjectStoreError>;

    /// Writes an object, replacing any object already stored under the same key.
    async fn put(&self, container: &str, key: &str, content: Bytes) -> Result<(), ObjectStoreError>;

    async fn delete(&self, container: &str, key: &str) -> Result<(), ObjectStoreError>;
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")] // This handles case insensitivity during deserialization
#[strum(serialize_all = "snake_case")]
pub enum Engine {
    #[default]
    Filesystem,
    Gcs,
}

pub fn new(
    config: &crate::conf::ObjectStore,
) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
    match config.engine {
        Engine::Filesystem => {
            let Some(settings) = &config.filesystem else {
                return Err(ObjectStoreError::FailedPrecondition(
                    "Filesystem engine settings not found in config".into(),
                ));
            };

            let engine = filesystem::Engine::new(settings)?;
            Ok(Arc::new(engine))
        }
        Engine::Gcs => {
            let settings = config.gcs.clone().unwrap_or_default();
            Ok(Arc::new(gcs::Engine::new(&settings)))
        }
    }
}
