use super::{ObjectStore, ObjectStoreError, ObjectStream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::{local::LocalFileSystem, path::Path, ObjectStore as ObjStore};
use serde::Deserialize;
use tracing::debug;

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The path of the directory that contains one sub-directory per container.
    pub path: String,
}

/// Serves containers out of a local directory; mostly useful for development and for running
/// against storage mounted into the host.
#[derive(Debug)]
pub struct Engine(LocalFileSystem);

fn object_path(container: &str, key: &str) -> Path {
    Path::from(format!("{container}/{key}"))
}

impl Engine {
    pub fn new(config: &Config) -> Result<Self, ObjectStoreError> {
        std::fs::create_dir_all(&config.path).map_err(|e| {
            ObjectStoreError::FailedPrecondition(format!(
                "could not create object store directory '{}'; {e}",
                config.path
            ))
        })?;

        let store = LocalFileSystem::new_with_prefix(&config.path).map_err(|e| {
            ObjectStoreError::FailedPrecondition(format!(
                "could not open object store directory '{}'; {e}",
                config.path
            ))
        })?;

        debug!(path = %config.path, "Opened filesystem object store");

        Ok(Engine(store))
    }
}

#[async_trait]
impl ObjectStore for Engine {
    async fn get_stream(&self, container: &str, key: &str) -> Result<ObjectStream, ObjectStoreError> {
        let path = object_path(container, key);

        let object_stream = self
            .0
            .get(&path)
            .await
            .map_err(ObjectStoreError::from)?
            .into_stream();

        let object_stream = object_stream.map(|item| item.map_err(ObjectStoreError::from));

        Ok(Box::pin(object_stream))
    }

    async fn put(&self, container: &str, key: &str, content: Bytes) -> Result<(), ObjectStoreError> {
        let path = object_path(container, key);

        let payload = object_store::PutPayload::from_bytes(content);

        self.0
            .put(&path, payload)
            .await
            .map_err(ObjectStoreError::from)?;

        Ok(())
    }

    async fn delete(&self, container: &str, key: &str) -> Result<(), ObjectStoreError> {
        let path = object_path(container, key);

        self.0.delete(&path).await.map_err(ObjectStoreError::from)?;

        Ok(())
    }
}
