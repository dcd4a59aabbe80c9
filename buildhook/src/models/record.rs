use super::BuildOutcome;
use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Used when the build service reports a failure without saying why.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Build failed";

/// Where build logs can be viewed, rendered from `template` by replacing `{build_id}` and
/// `{project_id}`.
pub fn log_url(template: &str, build_id: &str, project_id: &str) -> String {
    template
        .replace("{build_id}", build_id)
        .replace("{project_id}", project_id)
}

/// The outcome of a single run, as persisted and as delivered to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    /// The run identifier. Named after the field consumers of the webhook already know.
    pub build_id: String,

    pub success: bool,

    /// Link to the build's logs; empty if no build was ever accepted by the build service.
    pub log_url: String,

    /// Creation time of the record, ISO-8601 in UTC.
    pub timestamp: String,

    /// Why the run failed; empty on success.
    pub error: String,
}

impl ResultRecord {
    pub fn from_outcome(run_id: &str, outcome: &BuildOutcome, log_url: String) -> Self {
        let success = outcome.succeeded();

        let error = if success {
            String::new()
        } else {
            match outcome.status_detail.as_deref() {
                Some(detail) if !detail.is_empty() => detail.to_string(),
                _ => DEFAULT_FAILURE_MESSAGE.to_string(),
            }
        };

        Self {
            build_id: run_id.into(),
            success,
            log_url,
            timestamp: now_iso8601(),
            error,
        }
    }

    pub fn from_error(run_id: &str, log_url: String, message: String) -> Self {
        Self {
            build_id: run_id.into(),
            success: false,
            log_url,
            timestamp: now_iso8601(),
            error: message,
        }
    }
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
