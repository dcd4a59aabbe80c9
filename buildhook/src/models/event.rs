use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Describes a newly created object in storage; the trigger for a single run.
///
/// The canonical shape is `{"container", "objectKey", "correlationId"}`, but the object-finalize
/// payload emitted by Cloud Storage (`{"bucket", "name", ...}`) is accepted as is so the service
/// can be pointed straight at a storage notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageEvent {
    /// The storage container (bucket) the object was created in.
    #[serde(alias = "bucket")]
    pub container: String,

    /// Path of the newly created object within the container.
    #[serde(alias = "name")]
    pub object_key: String,

    /// Identifier of the delivery that produced this event. Redelivery of the same event carries the
    /// same identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl StorageEvent {
    pub fn new(container: &str, object_key: &str, correlation_id: Option<&str>) -> Self {
        Self {
            container: container.into(),
            object_key: object_key.into(),
            correlation_id: correlation_id.map(|id| id.into()),
        }
    }

    /// Returns the correlation identifier only if it carries a usable value.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserialize_canonical_shape() {
        let event: StorageEvent = serde_json::from_str(
            r#"{"container": "b1", "objectKey": "app.zip", "correlationId": "run-42"}"#,
        )
        .unwrap();

        assert_eq!(event, StorageEvent::new("b1", "app.zip", Some("run-42")));
    }

    #[test]
    /// Storage notifications carry many more fields; only the ones we need are kept.
    fn deserialize_storage_finalize_payload() {
        let event: StorageEvent = serde_json::from_str(
            r#"{
                "kind": "storage#object",
                "bucket": "uploads",
                "name": "builds/app.zip",
                "contentType": "application/zip",
                "size": "1024"
            }"#,
        )
        .unwrap();

        assert_eq!(event, StorageEvent::new("uploads", "builds/app.zip", None));
    }

    #[test]
    fn blank_correlation_id_is_treated_as_missing() {
        let event = StorageEvent::new("b1", "app.zip", Some("   "));
        assert_eq!(event.correlation_id(), None);

        let event = StorageEvent::new("b1", "app.zip", Some("evt-1"));
        assert_eq!(event.correlation_id(), Some("evt-1"));
    }
}
