use super::{Notifier, NotifierError};
use crate::models::ResultRecord;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Endpoint every result record is POSTed to.
    pub webhook_url: String,

    /// How long a single delivery may take in seconds.
    pub timeout: u64,
}

/// Posts result records as JSON to a single, statically configured url. The response body is never
/// read beyond error reporting.
#[derive(Debug)]
pub struct Webhook {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl Webhook {
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        Self {
            url: config.webhook_url.clone(),
            timeout: Duration::from_secs(config.timeout),
            client,
        }
    }
}

#[async_trait]
impl Notifier for Webhook {
    async fn notify(&self, record: &ResultRecord) -> Result<(), NotifierError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(record)
            .send()
            .await
            .map_err(|e| NotifierError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Status {
                code: status.as_u16(),
                body,
            });
        }

        debug!(url = self.url, status = status.as_u16(), "Delivered notification");
        Ok(())
    }
}
