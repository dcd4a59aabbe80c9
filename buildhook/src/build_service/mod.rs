pub mod cloud_build;

use crate::{
    credentials::TokenSource,
    models::{BuildHandle, BuildOutcome, BuildSpec},
    object_store::ObjectStore,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use strum::{Display, EnumString};

/// Represents different build service failure possibilities.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BuildServiceError {
    /// Failed to start due to misconfigured settings, usually from a misconfigured settings file.
    #[error("could not init build service; {0}")]
    FailedPrecondition(String),

    /// Failed to communicate with the build service due to network error or other.
    #[error("could not connect to build service; {0}")]
    Connection(String),

    /// The build service refused the request as malformed.
    #[error("build request rejected; {0}")]
    Rejected(String),

    #[error("not permitted to perform build request; {0}")]
    Permission(String),

    #[error("build service quota exhausted; {0}")]
    Quota(String),

    #[error("unexpected build service error occurred; {0}")]
    Unexpected(String),
}

/// The interface between the orchestrator and whatever actually executes builds.
#[async_trait]
pub trait BuildService: Debug + Send + Sync + 'static {
    /// Hands the build to the service. Returns as soon as the service has accepted it.
    async fn submit(&self, spec: &BuildSpec) -> Result<BuildHandle, BuildServiceError>;

    /// Waits until the build reaches a terminal status. This can take as long as the build itself;
    /// callers are expected to bound it.
    async fn await_completion(&self, handle: &BuildHandle) -> Result<BuildOutcome, BuildServiceError>;

    /// Asks the service to stop the build.
    async fn cancel(&self, handle: &BuildHandle) -> Result<(), BuildServiceError>;
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Engine {
    #[default]
    CloudBuild,
}

/// Builds the configured engine. The object store is where local sources are staged before a
/// remote build can see them.
pub fn new(
    config: &crate::conf::Build,
    project_id: &str,
    client: reqwest::Client,
    tokens: Arc<TokenSource>,
    object_store: Arc<dyn ObjectStore>,
) -> Result<Arc<dyn BuildService>, BuildServiceError> {
    if project_id.is_empty() {
        return Err(BuildServiceError::FailedPrecondition(
            "'general.project_id' must be set".into(),
        ));
    }

    match config.engine {
        Engine::CloudBuild => {
            let settings = config.cloud_build.clone().unwrap_or_default();
            let engine = cloud_build::Engine::new(
                &settings,
                project_id,
                Duration::from_secs(config.poll_interval.max(1)),
                client,
                tokens,
                object_store,
            );
            Ok(Arc::new(engine))
        }
    }
}
