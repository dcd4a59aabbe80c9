use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A single step of a build. The orchestrator never interprets steps; they are read from
/// configuration and handed to the build service untouched. Keys we don't model explicitly are
/// preserved in `extra` so newer build service features keep working.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStep {
    /// The container image the step runs in.
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,

    /// Working directory of the step, relative to the build's workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Environment variables in `KEY=VALUE` form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wait_for: Vec<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A source-control location the build service can check out by itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSource {
    pub repo_name: String,
    pub branch_name: String,
}

/// Where the build service gets the code to build from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildSource {
    /// A named repository and branch.
    Repo(RepoSource),

    /// An archive already sitting in object storage.
    StorageObject { bucket: String, object: String },

    /// A directory on the local filesystem; the build service is responsible for shipping it.
    LocalDirectory(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildSpec {
    pub steps: Vec<BuildStep>,
    pub source: BuildSource,
}

/// A reference to a build that was accepted by the build service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildHandle {
    /// Identifier assigned by the build service.
    pub build_id: String,

    /// Location of an archive uploaded on the build's behalf, if any. Removed once the build is
    /// finished with it.
    pub staged_source: Option<(String, String)>,
}

/// Terminal state of a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Succeeded,
    Failed,

    /// Any other terminal state the service reports (timed out, cancelled, internal error...),
    /// carried as the service's own status name.
    Other(String),
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Succeeded => write!(f, "SUCCESS"),
            BuildStatus::Failed => write!(f, "FAILURE"),
            BuildStatus::Other(status) => write!(f, "{status}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub build_id: String,
    pub status: BuildStatus,

    /// Free text explanation the service attaches to unsuccessful builds.
    pub status_detail: Option<String>,
}

impl BuildOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == BuildStatus::Succeeded
    }
}
