//! Drives a single storage event through the build lifecycle: acquire the object, build it, then
//! record and announce the result. Every run ends in exactly one [`ResultRecord`], whatever fails
//! along the way.

#[cfg(test)]
mod tests;

use crate::{
    archive::{ArchiveError, Extractor, ZipExtractor},
    build_service::{self, BuildService, BuildServiceError},
    conf,
    credentials::TokenSource,
    document_store::{self, DocumentStore},
    models::{
        self, AcquisitionMode, BuildHandle, BuildOutcome, BuildSource, BuildSpec, BuildStep,
        RepoSource, ResultRecord, Run, StorageEvent,
    },
    notifier::{webhook::Webhook, Notifier},
    object_store::{self, ObjectStore, ObjectStoreError},
    workspace::{ScratchFile, WorkingArea},
};
use anyhow::Context;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("could not download object '{key}' from '{container}'; {source}")]
    Download {
        container: String,
        key: String,
        #[source]
        source: ObjectStoreError,
    },

    #[error("could not prepare working area; {0}")]
    WorkingArea(#[source] std::io::Error),

    #[error("could not extract archive; {0}")]
    Extraction(#[source] ArchiveError),

    #[error("could not submit build; {0}")]
    Submission(#[source] BuildServiceError),

    #[error("could not determine build result; {0}")]
    Completion(#[source] BuildServiceError),

    #[error("build did not finish within {0:?}")]
    Timeout(Duration),
}

/// Everything about a run's lifecycle that comes from configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub project_id: String,
    pub acquisition_mode: AcquisitionMode,
    pub working_area_root: PathBuf,
    pub collection: String,
    pub steps: Vec<BuildStep>,
    pub repo_source: Option<RepoSource>,
    pub log_url_template: String,
    pub build_timeout: Duration,

    /// How long a best-effort cancellation of a timed out build may take.
    pub cancel_timeout: Duration,
}

/// The systems a run talks to.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub object_store: Arc<dyn ObjectStore>,
    pub extractor: Arc<dyn Extractor>,
    pub build_service: Arc<dyn BuildService>,
    pub document_store: Arc<dyn DocumentStore>,
    pub notifier: Arc<dyn Notifier>,
}

/// Filesystem resources held by a run. Closed once the run's result is out the door.
#[derive(Debug, Default)]
struct RunScope {
    scratch_file: Option<ScratchFile>,
    working_area: Option<WorkingArea>,
}

impl RunScope {
    async fn close(self) {
        if let Some(scratch_file) = self.scratch_file {
            scratch_file.close().await;
        }

        if let Some(working_area) = self.working_area {
            working_area.close().await;
        }
    }
}

/// A run that did not produce a build outcome. Remembers the build id if the build service had
/// already accepted the build, so the record can still link to it.
#[derive(Debug)]
struct RunFailure {
    build_id: Option<String>,
    error: OrchestratorError,
}

impl RunFailure {
    fn before_build(error: OrchestratorError) -> Self {
        Self {
            build_id: None,
            error,
        }
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    settings: Settings,
    collaborators: Collaborators,
}

impl Orchestrator {
    pub fn new(settings: Settings, collaborators: Collaborators) -> Self {
        Self {
            settings,
            collaborators,
        }
    }

    /// Connects every collaborator named in the configuration.
    pub async fn from_config(config: &conf::Config) -> anyhow::Result<Self> {
        let project_id = config.general.project_id.clone();

        let client = reqwest::Client::builder()
            .user_agent(concat!("buildhook/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Could not build http client")?;

        let tokens = Arc::new(
            TokenSource::new(&config.credentials, client.clone())
                .context("Could not init credentials")?,
        );

        let object_store =
            object_store::new(&config.object_store).context("Could not init object store")?;

        let build_service = build_service::new(
            &config.build,
            &project_id,
            client.clone(),
            tokens.clone(),
            object_store.clone(),
        )
        .context("Could not init build service")?;

        let document_store =
            document_store::new(&config.document_store, &project_id, client.clone(), tokens)
                .await
                .context("Could not init document store")?;

        if config.notifier.webhook_url.is_empty() {
            warn!("No webhook url configured; result notifications will fail");
        }

        let notifier = Arc::new(Webhook::new(&config.notifier, client));

        let settings = Settings {
            project_id,
            acquisition_mode: config.orchestrator.acquisition_mode,
            working_area_root: PathBuf::from(&config.orchestrator.working_area_root),
            collection: config.orchestrator.collection.clone(),
            steps: config.build.steps.clone(),
            repo_source: config.build.repo_source.clone(),
            log_url_template: config.build.log_url_template.clone(),
            build_timeout: Duration::from_secs(config.build.timeout),
            cancel_timeout: Duration::from_secs(config.build.cancel_timeout),
        };

        info!(
            mode = %settings.acquisition_mode,
            build_engine = %config.build.engine,
            object_store_engine = %config.object_store.engine,
            document_store_engine = %config.document_store.engine,
            "Orchestrator ready"
        );

        Ok(Self::new(
            settings,
            Collaborators {
                object_store,
                extractor: Arc::new(ZipExtractor),
                build_service,
                document_store,
                notifier,
            },
        ))
    }

    /// Handles one storage event from start to finish. Never fails: problems are reported through
    /// the returned record, which has also been persisted and sent to the notifier.
    #[instrument(skip_all, fields(container = %event.container, object_key = %event.object_key))]
    pub async fn handle(&self, event: StorageEvent) -> ResultRecord {
        let run = Run::new(
            &event,
            self.settings.acquisition_mode,
            &self.settings.working_area_root,
        );

        info!(
            run_id = run.run_id,
            mode = %self.settings.acquisition_mode,
            "Object uploaded, starting run"
        );

        let mut scope = RunScope::default();

        let record = match self.execute(&run, &mut scope).await {
            Ok(outcome) => {
                info!(
                    run_id = run.run_id,
                    build_id = outcome.build_id,
                    status = %outcome.status,
                    "Build completed"
                );
                ResultRecord::from_outcome(&run.run_id, &outcome, self.log_url(&outcome.build_id))
            }
            Err(failure) => {
                error!(run_id = run.run_id, error = %failure.error, "Run failed");
                let log_url = failure
                    .build_id
                    .as_deref()
                    .map(|build_id| self.log_url(build_id))
                    .unwrap_or_default();
                ResultRecord::from_error(&run.run_id, log_url, failure.error.to_string())
            }
        };

        self.persist(&run, &record).await;
        self.notify(&run, &record).await;

        // Only now, so the working area outlives persistence and notification.
        scope.close().await;

        let elapsed = chrono::Utc::now() - run.started;
        info!(
            run_id = run.run_id,
            success = record.success,
            elapsed_ms = elapsed.num_milliseconds(),
            "Run finished"
        );

        record
    }

    fn log_url(&self, build_id: &str) -> String {
        models::log_url(
            &self.settings.log_url_template,
            build_id,
            &self.settings.project_id,
        )
    }

    async fn execute(&self, run: &Run, scope: &mut RunScope) -> Result<BuildOutcome, RunFailure> {
        let source = self.acquire(run, scope).await.map_err(RunFailure::before_build)?;

        let spec = BuildSpec {
            steps: self.settings.steps.clone(),
            source,
        };

        let handle = self
            .collaborators
            .build_service
            .submit(&spec)
            .await
            .map_err(|e| RunFailure::before_build(OrchestratorError::Submission(e)))?;

        info!(run_id = run.run_id, build_id = handle.build_id, "Waiting for build");

        self.wait_for_build(&handle).await.map_err(|error| RunFailure {
            build_id: Some(handle.build_id.clone()),
            error,
        })
    }

    /// Works out what the build should be built from, materializing the object locally if needed.
    async fn acquire(&self, run: &Run, scope: &mut RunScope) -> Result<BuildSource, OrchestratorError> {
        let (Some(working_dir), Some(scratch_path)) = (run.working_area.clone(), run.scratch_file())
        else {
            // Direct reference.
            return Ok(match &self.settings.repo_source {
                Some(repo) => BuildSource::Repo(repo.clone()),
                None => BuildSource::StorageObject {
                    bucket: run.container.clone(),
                    object: run.object_key.clone(),
                },
            });
        };

        let scratch_file = scope.scratch_file.insert(ScratchFile::claim(scratch_path));
        self.download(run, scratch_file).await?;

        let working_area = WorkingArea::create(working_dir)
            .await
            .map_err(OrchestratorError::WorkingArea)?;
        let working_area = scope.working_area.insert(working_area);

        self.collaborators
            .extractor
            .extract(scratch_file.path(), working_area.path())
            .await
            .map_err(OrchestratorError::Extraction)?;

        debug!(
            run_id = run.run_id,
            working_area = %working_area.path().display(),
            "Extracted archive"
        );

        Ok(BuildSource::LocalDirectory(working_area.path().to_path_buf()))
    }

    /// Streams the object into the scratch file chunk by chunk.
    async fn download(&self, run: &Run, scratch_file: &ScratchFile) -> Result<(), OrchestratorError> {
        let download_error = |source| OrchestratorError::Download {
            container: run.container.clone(),
            key: run.object_key.clone(),
            source,
        };

        let mut stream = self
            .collaborators
            .object_store
            .get_stream(&run.container, &run.object_key)
            .await
            .map_err(download_error)?;

        if let Some(parent) = scratch_file.path().parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(OrchestratorError::WorkingArea)?;
        }

        let mut file = tokio::fs::File::create(scratch_file.path())
            .await
            .map_err(OrchestratorError::WorkingArea)?;

        let mut size = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(download_error)?;
            size += chunk.len();
            file.write_all(&chunk)
                .await
                .map_err(OrchestratorError::WorkingArea)?;
        }

        file.flush().await.map_err(OrchestratorError::WorkingArea)?;

        debug!(run_id = run.run_id, size, "Downloaded object");
        Ok(())
    }

    /// Waits for the build to reach a terminal state, giving up after the configured timeout. A
    /// build we stop waiting for is cancelled so it doesn't keep running unobserved.
    async fn wait_for_build(&self, handle: &BuildHandle) -> Result<BuildOutcome, OrchestratorError> {
        let build_service = &self.collaborators.build_service;

        match tokio::time::timeout(
            self.settings.build_timeout,
            build_service.await_completion(handle),
        )
        .await
        {
            Ok(result) => result.map_err(OrchestratorError::Completion),
            Err(_) => {
                warn!(
                    build_id = handle.build_id,
                    timeout_secs = self.settings.build_timeout.as_secs(),
                    "Build timed out, cancelling"
                );

                match tokio::time::timeout(
                    self.settings.cancel_timeout,
                    build_service.cancel(handle),
                )
                .await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        warn!(build_id = handle.build_id, error = %e, "Could not cancel build")
                    }
                    Err(_) => warn!(
                        build_id = handle.build_id,
                        timeout_secs = self.settings.cancel_timeout.as_secs(),
                        "Build cancellation did not complete in time"
                    ),
                }

                Err(OrchestratorError::Timeout(self.settings.build_timeout))
            }
        }
    }

    async fn persist(&self, run: &Run, record: &ResultRecord) {
        let document = match serde_json::to_value(record) {
            Ok(document) => document,
            Err(e) => {
                error!(run_id = run.run_id, error = %e, "Could not serialize result record");
                return;
            }
        };

        match self
            .collaborators
            .document_store
            .upsert(&self.settings.collection, &run.run_id, &document)
            .await
        {
            Ok(_) => debug!(
                run_id = run.run_id,
                collection = self.settings.collection,
                "Persisted result record"
            ),
            Err(e) => error!(
                run_id = run.run_id,
                collection = self.settings.collection,
                error = %e,
                "Could not persist result record"
            ),
        }
    }

    async fn notify(&self, run: &Run, record: &ResultRecord) {
        if let Err(e) = self.collaborators.notifier.notify(record).await {
            warn!(run_id = run.run_id, error = %e, "Could not deliver result notification");
        }
    }
}
