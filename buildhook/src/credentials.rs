//! Access tokens for the Google REST APIs used by the build service and document store engines.

use reqwest::RequestBuilder;
use serde::Deserialize;
use std::time::{Duration, Instant};
use strum::{Display, EnumString};
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_METADATA_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("credentials are misconfigured; {0}")]
    FailedPrecondition(String),

    #[error("could not obtain access token; {0}")]
    Fetch(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthMode {
    /// Requests are sent without credentials; for emulators.
    None,

    /// A fixed token taken from `access_token`.
    Static,

    /// Tokens of the attached service account, fetched from the instance metadata server.
    #[default]
    MetadataServer,
}

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub auth: AuthMode,
    pub access_token: Option<String>,
    pub metadata_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug)]
pub enum TokenSource {
    None,
    Static(String),
    MetadataServer {
        client: reqwest::Client,
        url: String,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl TokenSource {
    pub fn new(config: &Config, client: reqwest::Client) -> Result<Self, CredentialsError> {
        match config.auth {
            AuthMode::None => Ok(TokenSource::None),
            AuthMode::Static => match config.access_token.as_deref() {
                Some(token) if !token.is_empty() => Ok(TokenSource::Static(token.to_string())),
                _ => Err(CredentialsError::FailedPrecondition(
                    "auth mode 'static' requires 'access_token' to be set".into(),
                )),
            },
            AuthMode::MetadataServer => Ok(TokenSource::MetadataServer {
                client,
                url: config
                    .metadata_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_METADATA_URL.to_string()),
                cached: Mutex::new(None),
            }),
        }
    }

    /// Returns a valid access token, or None if requests should go out unauthenticated.
    pub async fn token(&self) -> Result<Option<String>, CredentialsError> {
        match self {
            TokenSource::None => Ok(None),
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::MetadataServer {
                client,
                url,
                cached,
            } => {
                let mut cached = cached.lock().await;

                if let Some(token) = cached.as_ref() {
                    if Instant::now() < token.refresh_at {
                        return Ok(Some(token.value.clone()));
                    }
                }

                let response = client
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| CredentialsError::Fetch(e.to_string()))?
                    .error_for_status()
                    .map_err(|e| CredentialsError::Fetch(e.to_string()))?;

                let token: MetadataToken = response
                    .json()
                    .await
                    .map_err(|e| CredentialsError::Fetch(e.to_string()))?;

                let lifetime = Duration::from_secs(token.expires_in);
                debug!(expires_in = token.expires_in, "Fetched access token from metadata server");

                *cached = Some(CachedToken {
                    value: token.access_token.clone(),
                    refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
                });

                Ok(Some(token.access_token))
            }
        }
    }

    /// Attaches a bearer token to the request if this source produces one.
    pub async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, CredentialsError> {
        match self.token().await? {
            Some(token) => Ok(request.bearer_auth(token)),
            None => Ok(request),
        }
    }
}
