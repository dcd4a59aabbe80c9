use super::{ObjectStore, ObjectStoreError, ObjectStream};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use object_store::{
    gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder},
    path::Path,
    ObjectStore as ObjStore,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path to a service account key file. When empty credentials are discovered from the
    /// environment (`GOOGLE_APPLICATION_CREDENTIALS`, then the instance metadata server).
    pub service_account_path: Option<String>,
}

/// Google Cloud Storage. Events can originate from any bucket, so a client is built lazily for each
/// bucket we're asked about and kept for the life of the process.
#[derive(Debug)]
pub struct Engine {
    config: Config,
    clients: DashMap<String, Arc<GoogleCloudStorage>>,
}

impl Engine {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            clients: DashMap::new(),
        }
    }

    fn client(&self, bucket: &str) -> Result<Arc<GoogleCloudStorage>, ObjectStoreError> {
        if let Some(client) = self.clients.get(bucket) {
            return Ok(client.clone());
        }

        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);

        if let Some(path) = &self.config.service_account_path {
            builder = builder.with_service_account_path(path);
        }

        let client = Arc::new(builder.build().map_err(|e| {
            ObjectStoreError::FailedPrecondition(format!(
                "could not create storage client for bucket '{bucket}'; {e}"
            ))
        })?);

        debug!(bucket, "Created storage client");

        self.clients.insert(bucket.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl ObjectStore for Engine {
    async fn get_stream(&self, container: &str, key: &str) -> Result<ObjectStream, ObjectStoreError> {
        let client = self.client(container)?;

        let object_stream = client
            .get(&Path::from(key))
            .await
            .map_err(ObjectStoreError::from)?
            .into_stream();

        let object_stream = object_stream.map(|item| item.map_err(ObjectStoreError::from));

        Ok(Box::pin(object_stream))
    }

    async fn put(&self, container: &str, key: &str, content: Bytes) -> Result<(), ObjectStoreError> {
        let client = self.client(container)?;

        client
            .put(&Path::from(key), object_store::PutPayload::from_bytes(content))
            .await
            .map_err(ObjectStoreError::from)?;

        Ok(())
    }

    async fn delete(&self, container: &str, key: &str) -> Result<(), ObjectStoreError> {
        let client = self.client(container)?;

        client
            .delete(&Path::from(key))
            .await
            .map_err(ObjectStoreError::from)?;

        Ok(())
    }
}
