use super::{DocumentStore, DocumentStoreError};
use crate::credentials::TokenSource;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base url of the Firestore REST API. Point it at an emulator for local development.
    pub api_url: String,

    pub database: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "https://firestore.googleapis.com/v1".into(),
            database: "(default)".into(),
        }
    }
}

/// Firestore documents are made of typed values rather than plain JSON.
fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // Integers travel as strings to survive 64 bit values.
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(values) => json!({
            "arrayValue": { "values": values.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

fn encode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect()
}

fn encode_document(document: &Value) -> Result<Value, DocumentStoreError> {
    match document {
        Value::Object(fields) => Ok(json!({ "fields": encode_fields(fields) })),
        other => Err(DocumentStoreError::Serialization(format!(
            "documents must be JSON objects; got '{other}'"
        ))),
    }
}

/// Google Cloud Firestore, through its REST API.
#[derive(Debug)]
pub struct Engine {
    config: Config,
    project_id: String,
    client: reqwest::Client,
    tokens: Arc<TokenSource>,
}

impl Engine {
    pub fn new(
        config: &Config,
        project_id: &str,
        client: reqwest::Client,
        tokens: Arc<TokenSource>,
    ) -> Result<Self, DocumentStoreError> {
        Url::parse(&config.api_url).map_err(|e| {
            DocumentStoreError::FailedPrecondition(format!(
                "invalid api url '{}'; {e}",
                config.api_url
            ))
        })?;

        Ok(Self {
            config: config.clone(),
            project_id: project_id.into(),
            client,
            tokens,
        })
    }

    fn document_url(&self, collection: &str, key: &str) -> Result<Url, DocumentStoreError> {
        let mut url = Url::parse(&self.config.api_url)
            .map_err(|e| DocumentStoreError::FailedPrecondition(e.to_string()))?;

        url.path_segments_mut()
            .map_err(|_| {
                DocumentStoreError::FailedPrecondition(format!(
                    "api url '{}' cannot be used as a base",
                    self.config.api_url
                ))
            })?
            .pop_if_empty()
            .extend([
                "projects",
                self.project_id.as_str(),
                "databases",
                self.config.database.as_str(),
                "documents",
                collection,
                key,
            ]);

        Ok(url)
    }
}

#[async_trait]
impl DocumentStore for Engine {
    /// A PATCH without an update mask creates the document or replaces all of its fields.
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        document: &Value,
    ) -> Result<(), DocumentStoreError> {
        let body = encode_document(document)?;
        let url = self.document_url(collection, key)?;

        let request = self.client.patch(url).json(&body);
        let request = self
            .tokens
            .authorize(request)
            .await
            .map_err(|e| DocumentStoreError::Permission(e.to_string()))?;

        let response = request
            .send()
            .await
            .map_err(|e| DocumentStoreError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            return match status.as_u16() {
                401 | 403 => Err(DocumentStoreError::Permission(body)),
                code => Err(DocumentStoreError::Unknown(format!(
                    "status code {code}; {body}"
                ))),
            };
        }

        debug!(collection, key, "Wrote document to firestore");
        Ok(())
    }
}
