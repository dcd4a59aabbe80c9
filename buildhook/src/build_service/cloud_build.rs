use super::{BuildService, BuildServiceError};
use crate::{
    archive,
    credentials::TokenSource,
    models::{BuildHandle, BuildOutcome, BuildSource, BuildSpec, BuildStatus, BuildStep},
    object_store::ObjectStore,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base url of the Cloud Build REST API.
    pub api_url: String,

    /// Bucket that local working areas are uploaded to before the build is submitted. Only needed
    /// when extracting archives.
    pub staging_bucket: Option<String>,

    /// Prefix of the uploaded working area objects within the staging bucket.
    pub staging_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "https://cloudbuild.googleapis.com/v1".into(),
            staging_bucket: None,
            staging_prefix: "buildhook-sources".into(),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
enum SourceBody {
    #[serde(rename_all = "camelCase")]
    RepoSource {
        repo_name: String,
        branch_name: String,
    },
    StorageSource {
        bucket: String,
        object: String,
    },
}

#[derive(Debug, Serialize, PartialEq)]
struct BuildRequest<'a> {
    steps: &'a [BuildStep],
    source: SourceBody,
}

#[derive(Debug, Deserialize)]
struct Operation {
    metadata: Option<OperationMetadata>,
}

#[derive(Debug, Deserialize)]
struct OperationMetadata {
    build: Option<BuildBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildBody {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    status_detail: String,
}

/// Maps a Cloud Build status onto our terminal states. Non-terminal states return None.
fn terminal_status(status: &str) -> Option<BuildStatus> {
    match status {
        "SUCCESS" => Some(BuildStatus::Succeeded),
        "FAILURE" => Some(BuildStatus::Failed),
        "INTERNAL_ERROR" | "TIMEOUT" | "CANCELLED" | "EXPIRED" => {
            Some(BuildStatus::Other(status.to_string()))
        }
        _ => None,
    }
}

fn error_from_status(status: u16, body: String) -> BuildServiceError {
    match status {
        400 => BuildServiceError::Rejected(body),
        401 | 403 => BuildServiceError::Permission(body),
        429 => BuildServiceError::Quota(body),
        code => BuildServiceError::Unexpected(format!("status code {code}; {body}")),
    }
}

async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, BuildServiceError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(error_from_status(status, body))
}

/// Google Cloud Build, driven through its REST API.
#[derive(Debug)]
pub struct Engine {
    config: Config,
    project_id: String,
    poll_interval: Duration,
    client: reqwest::Client,
    tokens: Arc<TokenSource>,
    object_store: Arc<dyn ObjectStore>,
}

impl Engine {
    pub fn new(
        config: &Config,
        project_id: &str,
        poll_interval: Duration,
        client: reqwest::Client,
        tokens: Arc<TokenSource>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config: config.clone(),
            project_id: project_id.into(),
            poll_interval,
            client,
            tokens,
            object_store,
        }
    }

    fn builds_url(&self) -> String {
        format!(
            "{}/projects/{}/builds",
            self.config.api_url.trim_end_matches('/'),
            self.project_id
        )
    }

    /// Uploads a local directory so the build service can reach it.
    async fn stage_directory(
        &self,
        dir: &std::path::Path,
    ) -> Result<(String, String), BuildServiceError> {
        let Some(bucket) = self.config.staging_bucket.clone() else {
            return Err(BuildServiceError::FailedPrecondition(
                "building a local directory requires 'staging_bucket' to be set".into(),
            ));
        };

        let packed = archive::pack_directory_async(dir.to_path_buf())
            .await
            .map_err(|e| {
                BuildServiceError::Unexpected(format!("could not pack working area; {e}"))
            })?;

        let object = format!(
            "{}/{}.tgz",
            self.config.staging_prefix.trim_end_matches('/'),
            uuid::Uuid::new_v4()
        );

        let size = packed.len();

        self.object_store
            .put(&bucket, &object, packed.into())
            .await
            .map_err(|e| {
                BuildServiceError::Connection(format!("could not upload working area; {e}"))
            })?;

        debug!(bucket, object, size, "Staged working area for build");

        Ok((bucket, object))
    }

    async fn remove_staged(&self, handle: &BuildHandle) {
        let Some((bucket, object)) = &handle.staged_source else {
            return;
        };

        if let Err(e) = self.object_store.delete(bucket, object).await {
            warn!(bucket, object, error = %e, "Could not remove staged working area");
        }
    }

    async fn create_build(&self, request: &BuildRequest<'_>) -> Result<String, BuildServiceError> {
        let http_request = self.client.post(self.builds_url()).json(request);
        let http_request = self
            .tokens
            .authorize(http_request)
            .await
            .map_err(|e| BuildServiceError::Permission(e.to_string()))?;

        let response = http_request
            .send()
            .await
            .map_err(|e| BuildServiceError::Connection(e.to_string()))?;

        let operation: Operation = check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| BuildServiceError::Unexpected(format!("could not parse operation; {e}")))?;

        operation
            .metadata
            .and_then(|metadata| metadata.build)
            .map(|build| build.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                BuildServiceError::Unexpected("operation did not include a build id".into())
            })
    }

    async fn poll_until_terminal(&self, handle: &BuildHandle) -> Result<BuildOutcome, BuildServiceError> {
        loop {
            let build = self.get_build(&handle.build_id).await?;

            if let Some(status) = terminal_status(&build.status) {
                return Ok(BuildOutcome {
                    build_id: build.id,
                    status,
                    status_detail: Some(build.status_detail).filter(|detail| !detail.is_empty()),
                });
            }

            debug!(build_id = handle.build_id, status = build.status, "Build still in progress");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn request_cancel(&self, build_id: &str) -> Result<(), BuildServiceError> {
        let http_request = self
            .client
            .post(format!("{}/{}:cancel", self.builds_url(), build_id))
            .json(&serde_json::json!({}));
        let http_request = self
            .tokens
            .authorize(http_request)
            .await
            .map_err(|e| BuildServiceError::Permission(e.to_string()))?;

        let response = http_request
            .send()
            .await
            .map_err(|e| BuildServiceError::Connection(e.to_string()))?;

        check_response(response).await?;
        Ok(())
    }

    async fn get_build(&self, build_id: &str) -> Result<BuildBody, BuildServiceError> {
        let http_request = self
            .client
            .get(format!("{}/{}", self.builds_url(), build_id));
        let http_request = self
            .tokens
            .authorize(http_request)
            .await
            .map_err(|e| BuildServiceError::Permission(e.to_string()))?;

        let response = http_request
            .send()
            .await
            .map_err(|e| BuildServiceError::Connection(e.to_string()))?;

        check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| BuildServiceError::Unexpected(format!("could not parse build; {e}")))
    }
}

fn source_body(source: &BuildSource) -> Option<SourceBody> {
    match source {
        BuildSource::Repo(repo) => Some(SourceBody::RepoSource {
            repo_name: repo.repo_name.clone(),
            branch_name: repo.branch_name.clone(),
        }),
        BuildSource::StorageObject { bucket, object } => Some(SourceBody::StorageSource {
            bucket: bucket.clone(),
            object: object.clone(),
        }),
        BuildSource::LocalDirectory(_) => None,
    }
}

#[async_trait]
impl BuildService for Engine {
    async fn submit(&self, spec: &BuildSpec) -> Result<BuildHandle, BuildServiceError> {
        let staged_source = match &spec.source {
            BuildSource::LocalDirectory(dir) => Some(self.stage_directory(dir).await?),
            _ => None,
        };

        let source = match (&staged_source, source_body(&spec.source)) {
            (Some((bucket, object)), _) => SourceBody::StorageSource {
                bucket: bucket.clone(),
                object: object.clone(),
            },
            (None, Some(source)) => source,
            (None, None) => {
                return Err(BuildServiceError::FailedPrecondition(
                    "build source could not be resolved".into(),
                ))
            }
        };

        let request = BuildRequest {
            steps: &spec.steps,
            source,
        };

        match self.create_build(&request).await {
            Ok(build_id) => {
                info!(build_id, project_id = self.project_id, "Submitted build");
                Ok(BuildHandle {
                    build_id,
                    staged_source,
                })
            }
            Err(e) => {
                // Nothing will ever read the staged source.
                self.remove_staged(&BuildHandle {
                    build_id: String::new(),
                    staged_source,
                })
                .await;
                Err(e)
            }
        }
    }

    async fn await_completion(&self, handle: &BuildHandle) -> Result<BuildOutcome, BuildServiceError> {
        let result = self.poll_until_terminal(handle).await;

        // On every exit, not only terminal states.
        self.remove_staged(handle).await;

        result
    }

    async fn cancel(&self, handle: &BuildHandle) -> Result<(), BuildServiceError> {
        let result = self.request_cancel(&handle.build_id).await;

        self.remove_staged(handle).await;

        result?;

        info!(build_id = handle.build_id, "Cancelled build");
        Ok(())
    }
}
