use super::StorageEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

/// How the triggering object is handed to the build service.
#[derive(Debug, Clone, Copy, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum AcquisitionMode {
    /// The object is referenced in place; nothing is downloaded.
    DirectReference,

    /// The object is downloaded, extracted into a working area and the working area is submitted.
    #[default]
    Extract,
}

/// One orchestration attempt for a single storage event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    /// Unique identifier of the run. Also the key of the run's result document.
    pub run_id: String,

    /// The container the triggering object lives in.
    pub container: String,

    /// The key of the triggering object.
    pub object_key: String,

    /// Directory the archive is extracted into. Only present when extracting.
    pub working_area: Option<PathBuf>,

    pub started: DateTime<Utc>,
}

impl Run {
    pub fn new(event: &StorageEvent, mode: AcquisitionMode, working_area_root: &Path) -> Self {
        let run_id = match event.correlation_id() {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let working_area = match mode {
            AcquisitionMode::DirectReference => None,
            AcquisitionMode::Extract => Some(working_area_root.join(path_safe_id(&run_id))),
        };

        Self {
            run_id,
            container: event.container.clone(),
            object_key: event.object_key.clone(),
            working_area,
            started: Utc::now(),
        }
    }

    /// Where the downloaded archive is kept while it is being extracted. Sits next to the working
    /// area rather than inside it so extraction never sees it.
    pub fn scratch_file(&self) -> Option<PathBuf> {
        self.working_area
            .as_ref()
            .map(|dir| dir.with_extension("archive"))
    }
}

/// Event identifiers are opaque; they may contain separators or traversal sequences that must not
/// leak into a filesystem path. ASCII alphanumerics and `-` are kept, every other byte (`_`
/// included) becomes `_` followed by two hex digits. Distinct identifiers therefore always map to
/// distinct names.
pub fn path_safe_id(id: &str) -> String {
    if id.is_empty() {
        return "_".into();
    }

    let mut safe = String::with_capacity(id.len());

    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            safe.push(char::from(byte));
        } else {
            safe.push_str(&format!("_{byte:02x}"));
        }
    }

    safe
}
