use super::*;
use crate::archive::{tests::write_zip, ZipExtractor};
use crate::document_store::DocumentStoreError;
use crate::models::BuildStatus;
use crate::notifier::NotifierError;
use crate::object_store::ObjectStream;
use async_trait::async_trait;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

const BUCKET: &str = "uploads";
const ARCHIVE_KEY: &str = "apps/app.zip";

#[derive(Debug, Default)]
struct FakeObjectStore {
    objects: Mutex<HashMap<(String, String), Bytes>>,
}

impl FakeObjectStore {
    fn insert(&self, container: &str, key: &str, content: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((container.into(), key.into()), Bytes::from(content));
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn get_stream(&self, container: &str, key: &str) -> Result<ObjectStream, ObjectStoreError> {
        let content = self
            .objects
            .lock()
            .unwrap()
            .get(&(container.to_string(), key.to_string()))
            .cloned()
            .ok_or(ObjectStoreError::NotFound)?;

        // Hand the content out in small pieces to exercise chunked writes.
        let chunks: Vec<Result<Bytes, ObjectStoreError>> = content
            .chunks(7)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();

        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn put(&self, container: &str, key: &str, content: Bytes) -> Result<(), ObjectStoreError> {
        self.insert(container, key, content.to_vec());
        Ok(())
    }

    async fn delete(&self, container: &str, key: &str) -> Result<(), ObjectStoreError> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(container.to_string(), key.to_string()));
        Ok(())
    }
}

#[derive(Debug)]
enum Behavior {
    Finish {
        status: BuildStatus,
        detail: Option<String>,
    },
    /// Refuse the submission for lack of permission.
    Reject(String),
    Hang,

    /// Never finish, and never answer the cancellation either.
    Unresponsive,
}

/// What the build service saw when a build was submitted.
#[derive(Debug, Clone)]
struct Submission {
    source: BuildSource,
    step_count: usize,
    gradle_file: Option<String>,
}

#[derive(Debug)]
struct FakeBuildService {
    build_id: String,
    behavior: Behavior,
    submissions: Mutex<Vec<Submission>>,
    cancelled: Mutex<Vec<String>>,
}

impl FakeBuildService {
    fn new(behavior: Behavior) -> Self {
        Self {
            build_id: "xyz".into(),
            behavior,
            submissions: Mutex::new(vec![]),
            cancelled: Mutex::new(vec![]),
        }
    }

    fn succeeding() -> Self {
        Self::new(Behavior::Finish {
            status: BuildStatus::Succeeded,
            detail: None,
        })
    }

    fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildService for FakeBuildService {
    async fn submit(&self, spec: &BuildSpec) -> Result<BuildHandle, BuildServiceError> {
        let gradle_file = match &spec.source {
            BuildSource::LocalDirectory(dir) => {
                std::fs::read_to_string(dir.join("source/build.gradle")).ok()
            }
            _ => None,
        };

        self.submissions.lock().unwrap().push(Submission {
            source: spec.source.clone(),
            step_count: spec.steps.len(),
            gradle_file,
        });

        if let Behavior::Reject(reason) = &self.behavior {
            return Err(BuildServiceError::Permission(reason.clone()));
        }

        Ok(BuildHandle {
            build_id: self.build_id.clone(),
            staged_source: None,
        })
    }

    async fn await_completion(&self, handle: &BuildHandle) -> Result<BuildOutcome, BuildServiceError> {
        match &self.behavior {
            Behavior::Finish { status, detail } => Ok(BuildOutcome {
                build_id: handle.build_id.clone(),
                status: status.clone(),
                status_detail: detail.clone(),
            }),
            Behavior::Reject(_) => Err(BuildServiceError::Unexpected("never submitted".into())),
            Behavior::Hang | Behavior::Unresponsive => std::future::pending().await,
        }
    }

    async fn cancel(&self, handle: &BuildHandle) -> Result<(), BuildServiceError> {
        if let Behavior::Unresponsive = self.behavior {
            return std::future::pending().await;
        }

        self.cancelled.lock().unwrap().push(handle.build_id.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FakeDocumentStore {
    fail: bool,
    documents: Mutex<HashMap<(String, String), serde_json::Value>>,
}

impl FakeDocumentStore {
    fn get(&self, collection: &str, key: &str) -> Option<serde_json::Value> {
        self.documents
            .lock()
            .unwrap()
            .get(&(collection.to_string(), key.to_string()))
            .cloned()
    }

    fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentStore for FakeDocumentStore {
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        document: &serde_json::Value,
    ) -> Result<(), DocumentStoreError> {
        if self.fail {
            return Err(DocumentStoreError::Connection("store offline".into()));
        }

        self.documents
            .lock()
            .unwrap()
            .insert((collection.into(), key.into()), document.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FakeNotifier {
    fail: bool,
    delivered: Mutex<Vec<ResultRecord>>,
}

impl FakeNotifier {
    fn delivered(&self) -> Vec<ResultRecord> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, record: &ResultRecord) -> Result<(), NotifierError> {
        self.delivered.lock().unwrap().push(record.clone());

        if self.fail {
            return Err(NotifierError::Status {
                code: 500,
                body: "unavailable".into(),
            });
        }

        Ok(())
    }
}

struct TestHarness {
    orchestrator: Orchestrator,
    working_root: TempDir,
    object_store: Arc<FakeObjectStore>,
    build_service: Arc<FakeBuildService>,
    document_store: Arc<FakeDocumentStore>,
    notifier: Arc<FakeNotifier>,
}

struct HarnessOptions {
    mode: AcquisitionMode,
    repo_source: Option<RepoSource>,
    build_service: FakeBuildService,
    document_store: FakeDocumentStore,
    notifier: FakeNotifier,
    timeout: Duration,
    cancel_timeout: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::Extract,
            repo_source: None,
            build_service: FakeBuildService::succeeding(),
            document_store: FakeDocumentStore::default(),
            notifier: FakeNotifier::default(),
            timeout: Duration::from_secs(30),
            cancel_timeout: Duration::from_secs(30),
        }
    }
}

impl TestHarness {
    fn new(options: HarnessOptions) -> Self {
        let working_root = tempfile::tempdir().unwrap();
        let object_store = Arc::new(FakeObjectStore::default());
        let build_service = Arc::new(options.build_service);
        let document_store = Arc::new(options.document_store);
        let notifier = Arc::new(options.notifier);

        let settings = Settings {
            project_id: "proj".into(),
            acquisition_mode: options.mode,
            working_area_root: working_root.path().to_path_buf(),
            collection: "build_results".into(),
            steps: vec![
                BuildStep {
                    name: "gcr.io/cloud-builders/gradle".into(),
                    args: vec!["assembleDebug".into()],
                    ..Default::default()
                },
                BuildStep {
                    name: "gcr.io/cloud-builders/gsutil".into(),
                    args: vec!["cp".into(), "app-debug.apk".into(), "gs://artifacts/".into()],
                    ..Default::default()
                },
            ],
            repo_source: options.repo_source,
            log_url_template:
                "https://console.cloud.google.com/cloud-build/builds/{build_id}?project={project_id}"
                    .into(),
            build_timeout: options.timeout,
            cancel_timeout: options.cancel_timeout,
        };

        let collaborators = Collaborators {
            object_store: object_store.clone(),
            extractor: Arc::new(ZipExtractor),
            build_service: build_service.clone(),
            document_store: document_store.clone(),
            notifier: notifier.clone(),
        };

        Self {
            orchestrator: Orchestrator::new(settings, collaborators),
            working_root,
            object_store,
            build_service,
            document_store,
            notifier,
        }
    }

    /// Uploads a small android project archive to the fake object store.
    fn upload_project(&self) {
        let staging = tempfile::tempdir().unwrap();
        let archive = staging.path().join("app.zip");
        write_zip(
            &archive,
            &[
                ("scripts/setup-android-sdk.sh", "#!/bin/bash\necho setup"),
                ("source/build.gradle", "apply plugin: 'com.android.application'"),
            ],
        );

        self.object_store
            .insert(BUCKET, ARCHIVE_KEY, std::fs::read(archive).unwrap());
    }

    fn working_area(&self, run_id: &str) -> std::path::PathBuf {
        self.working_root.path().join(run_id)
    }

    fn working_root_is_empty(&self) -> bool {
        std::fs::read_dir(self.working_root.path())
            .unwrap()
            .next()
            .is_none()
    }
}

fn event(correlation_id: Option<&str>) -> StorageEvent {
    StorageEvent::new(BUCKET, ARCHIVE_KEY, correlation_id)
}

fn log_url_for(build_id: &str) -> String {
    format!("https://console.cloud.google.com/cloud-build/builds/{build_id}?project=proj")
}

#[tokio::test]
async fn successful_build_is_recorded_and_announced() {
    let harness = TestHarness::new(HarnessOptions::default());
    harness.upload_project();

    let record = harness.orchestrator.handle(event(Some("run-42"))).await;

    assert_eq!(record.build_id, "run-42");
    assert!(record.success);
    assert_eq!(record.log_url, log_url_for("xyz"));
    assert_eq!(record.error, "");

    let submissions = harness.build_service.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(
        submissions[0].source,
        BuildSource::LocalDirectory(harness.working_area("run-42"))
    );
    assert_eq!(submissions[0].step_count, 2);
    assert_eq!(
        submissions[0].gradle_file.as_deref(),
        Some("apply plugin: 'com.android.application'")
    );

    let stored = harness
        .document_store
        .get("build_results", "run-42")
        .unwrap();
    assert_eq!(stored, serde_json::to_value(&record).unwrap());
    assert_eq!(harness.notifier.delivered(), vec![record]);

    assert!(!harness.working_area("run-42").exists());
    assert!(harness.working_root_is_empty());
}

#[tokio::test]
async fn failed_build_without_detail_uses_default_message() {
    let harness = TestHarness::new(HarnessOptions {
        build_service: FakeBuildService::new(Behavior::Finish {
            status: BuildStatus::Failed,
            detail: None,
        }),
        ..Default::default()
    });
    harness.upload_project();

    let record = harness.orchestrator.handle(event(Some("run-43"))).await;

    assert!(!record.success);
    assert_eq!(record.error, "Build failed");
    assert_eq!(record.log_url, log_url_for("xyz"));
    assert_eq!(harness.notifier.delivered(), vec![record]);
}

#[tokio::test]
async fn failed_build_carries_service_detail() {
    let harness = TestHarness::new(HarnessOptions {
        build_service: FakeBuildService::new(Behavior::Finish {
            status: BuildStatus::Other("TIMEOUT".into()),
            detail: Some("step 1 exceeded its deadline".into()),
        }),
        ..Default::default()
    });
    harness.upload_project();

    let record = harness.orchestrator.handle(event(Some("run-44"))).await;

    assert!(!record.success);
    assert_eq!(record.error, "step 1 exceeded its deadline");
}

#[tokio::test]
async fn missing_object_never_reaches_build_service() {
    let harness = TestHarness::new(HarnessOptions::default());

    let record = harness.orchestrator.handle(event(Some("run-45"))).await;

    assert!(!record.success);
    assert_eq!(record.log_url, "");
    assert_eq!(
        record.error,
        "could not download object 'apps/app.zip' from 'uploads'; requested object not found"
    );
    assert!(harness.build_service.submissions().is_empty());
    assert_eq!(harness.notifier.delivered(), vec![record.clone()]);
    assert!(harness
        .document_store
        .get("build_results", "run-45")
        .is_some());
    assert!(harness.working_root_is_empty());
}

#[tokio::test]
async fn corrupt_archive_never_reaches_build_service() {
    let harness = TestHarness::new(HarnessOptions::default());
    harness
        .object_store
        .insert(BUCKET, ARCHIVE_KEY, b"definitely not a zip file".to_vec());

    let record = harness.orchestrator.handle(event(Some("run-46"))).await;

    assert!(!record.success);
    assert_eq!(record.log_url, "");
    assert!(record.error.starts_with("could not extract archive"));
    assert!(harness.build_service.submissions().is_empty());
    assert!(!harness.working_area("run-46").exists());
    assert!(harness.working_root_is_empty());
}

#[tokio::test]
async fn rejected_submission_is_reported() {
    let harness = TestHarness::new(HarnessOptions {
        build_service: FakeBuildService::new(Behavior::Reject(
            "caller lacks cloudbuild.builds.create".into(),
        )),
        ..Default::default()
    });
    harness.upload_project();

    let record = harness.orchestrator.handle(event(Some("run-47"))).await;

    assert!(!record.success);
    assert_eq!(record.log_url, "");
    assert_eq!(
        record.error,
        "could not submit build; not permitted to perform build request; \
        caller lacks cloudbuild.builds.create"
    );
    assert_eq!(harness.notifier.delivered().len(), 1);
    assert!(harness.working_root_is_empty());
}

#[tokio::test]
async fn runs_without_correlation_id_get_distinct_ids() {
    let harness = TestHarness::new(HarnessOptions::default());
    harness.upload_project();

    let first = harness.orchestrator.handle(event(None)).await;
    let second = harness.orchestrator.handle(event(Some("   "))).await;

    assert!(!first.build_id.is_empty());
    assert_ne!(first.build_id, second.build_id);
    assert_eq!(harness.document_store.len(), 2);
}

#[tokio::test]
async fn redelivered_event_overwrites_previous_record() {
    let harness = TestHarness::new(HarnessOptions::default());
    harness.upload_project();

    harness.orchestrator.handle(event(Some("run-48"))).await;
    let second = harness.orchestrator.handle(event(Some("run-48"))).await;

    assert_eq!(harness.document_store.len(), 1);
    assert_eq!(
        harness
            .document_store
            .get("build_results", "run-48")
            .unwrap(),
        serde_json::to_value(&second).unwrap()
    );
    assert_eq!(harness.notifier.delivered().len(), 2);
}

#[tokio::test]
async fn persistence_failure_still_notifies() {
    let harness = TestHarness::new(HarnessOptions {
        document_store: FakeDocumentStore {
            fail: true,
            ..Default::default()
        },
        ..Default::default()
    });
    harness.upload_project();

    let record = harness.orchestrator.handle(event(Some("run-49"))).await;

    assert!(record.success);
    assert_eq!(harness.notifier.delivered(), vec![record]);
    assert!(harness.working_root_is_empty());
}

#[tokio::test]
async fn notification_failure_keeps_persisted_record() {
    let harness = TestHarness::new(HarnessOptions {
        notifier: FakeNotifier {
            fail: true,
            ..Default::default()
        },
        ..Default::default()
    });
    harness.upload_project();

    let record = harness.orchestrator.handle(event(Some("run-50"))).await;

    assert!(record.success);
    assert_eq!(
        harness
            .document_store
            .get("build_results", "run-50")
            .unwrap(),
        serde_json::to_value(&record).unwrap()
    );
    assert!(harness.working_root_is_empty());
}

#[tokio::test]
async fn direct_reference_submits_storage_object() {
    let harness = TestHarness::new(HarnessOptions {
        mode: AcquisitionMode::DirectReference,
        ..Default::default()
    });

    let record = harness.orchestrator.handle(event(Some("run-51"))).await;

    assert!(record.success);
    assert_eq!(
        harness.build_service.submissions()[0].source,
        BuildSource::StorageObject {
            bucket: BUCKET.into(),
            object: ARCHIVE_KEY.into(),
        }
    );
    assert!(harness.working_root_is_empty());
}

#[tokio::test]
async fn direct_reference_prefers_configured_repository() {
    let repo = RepoSource {
        repo_name: "android-app".into(),
        branch_name: "main".into(),
    };
    let harness = TestHarness::new(HarnessOptions {
        mode: AcquisitionMode::DirectReference,
        repo_source: Some(repo.clone()),
        ..Default::default()
    });

    harness.orchestrator.handle(event(Some("run-52"))).await;

    assert_eq!(
        harness.build_service.submissions()[0].source,
        BuildSource::Repo(repo)
    );
}

#[tokio::test]
async fn slow_build_is_cancelled() {
    let harness = TestHarness::new(HarnessOptions {
        build_service: FakeBuildService::new(Behavior::Hang),
        timeout: Duration::from_millis(50),
        ..Default::default()
    });
    harness.upload_project();

    let record = harness.orchestrator.handle(event(Some("run-53"))).await;

    assert!(!record.success);
    assert_eq!(record.log_url, log_url_for("xyz"));
    assert_eq!(record.error, "build did not finish within 50ms");
    assert_eq!(
        *harness.build_service.cancelled.lock().unwrap(),
        vec!["xyz".to_string()]
    );
    assert!(harness.working_root_is_empty());
}

#[tokio::test]
async fn unresponsive_cancellation_does_not_hold_the_run() {
    let harness = TestHarness::new(HarnessOptions {
        build_service: FakeBuildService::new(Behavior::Unresponsive),
        timeout: Duration::from_millis(50),
        cancel_timeout: Duration::from_millis(50),
        ..Default::default()
    });
    harness.upload_project();

    let record = tokio::time::timeout(
        Duration::from_secs(3),
        harness.orchestrator.handle(event(Some("run-55"))),
    )
    .await
    .expect("run should finish despite the hanging cancellation");

    assert!(!record.success);
    assert_eq!(record.log_url, log_url_for("xyz"));
    assert_eq!(harness.notifier.delivered(), vec![record]);
    assert!(harness.working_root_is_empty());
}

#[tokio::test]
async fn similar_run_ids_do_not_share_a_working_area() {
    let harness = TestHarness::new(HarnessOptions::default());
    harness.upload_project();

    let (first, second) = tokio::join!(
        harness.orchestrator.handle(event(Some("run.56"))),
        harness.orchestrator.handle(event(Some("run_56"))),
    );

    assert!(first.success, "{}", first.error);
    assert!(second.success, "{}", second.error);

    let submissions = harness.build_service.submissions();
    assert_eq!(submissions.len(), 2);
    assert_ne!(submissions[0].source, submissions[1].source);
    for submission in &submissions {
        assert_eq!(
            submission.gradle_file.as_deref(),
            Some("apply plugin: 'com.android.application'")
        );
    }
    assert!(harness.working_root_is_empty());
}

#[test]
fn working_area_sits_under_configured_root() {
    let run = Run::new(
        &event(Some("run/54")),
        AcquisitionMode::Extract,
        Path::new("/srv/work"),
    );

    assert_eq!(
        run.working_area.as_deref(),
        Some(Path::new("/srv/work/run_2f54"))
    );
}
