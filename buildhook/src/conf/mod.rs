use crate::{
    build_service::{self, cloud_build},
    credentials,
    document_store::{self, firestore, sqlite},
    models::{AcquisitionMode, BuildStep, RepoSource},
    notifier::webhook,
    object_store::{self, filesystem, gcs},
};
use anyhow::{anyhow, bail, Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use rust_embed::RustEmbed;
use serde::Deserialize;
use std::path::Path;

#[derive(RustEmbed)]
#[folder = "src/conf/"]
#[include = "*.toml"]
struct EmbeddedConfigFS;

/// Searched in order when the user does not give a config path.
const CONFIG_PATHS: &[&str] = &["/etc/buildhook/buildhook.toml"];

const ENV_PREFIX: &str = "BUILDHOOK_";

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub general: General,
    pub server: Server,
    pub orchestrator: Orchestrator,
    pub build: Build,
    pub object_store: ObjectStore,
    pub document_store: DocumentStore,
    pub notifier: webhook::Config,
    pub credentials: credentials::Config,
}

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct General {
    pub log_level: String,

    /// Human readable logs instead of JSON lines.
    pub pretty_logging: bool,

    /// The project (account) builds are run in and results are stored under.
    pub project_id: String,
}

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub bind_address: String,
}

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct Orchestrator {
    pub acquisition_mode: AcquisitionMode,

    /// Directory run working areas are created under.
    pub working_area_root: String,

    /// Document store collection result records are written to.
    pub collection: String,
}

#[derive(Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Build {
    pub engine: build_service::Engine,

    /// Passed through to the build service untouched.
    pub steps: Vec<BuildStep>,

    /// When set, builds in direct reference mode check out this repository instead of using the
    /// uploaded object.
    pub repo_source: Option<RepoSource>,

    /// Rendered with `{build_id}` and `{project_id}` to link to a build's logs.
    pub log_url_template: String,

    /// How long to wait for a build to finish in seconds.
    pub timeout: u64,

    /// How often to check on a running build in seconds.
    pub poll_interval: u64,

    /// How long cancelling a timed out build may take in seconds.
    pub cancel_timeout: u64,

    pub cloud_build: Option<cloud_build::Config>,
}

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct ObjectStore {
    pub engine: object_store::Engine,
    pub filesystem: Option<filesystem::Config>,
    pub gcs: Option<gcs::Config>,
}

#[derive(Deserialize, Default, Debug, Clone, PartialEq, Eq)]
pub struct DocumentStore {
    pub engine: document_store::Engine,
    pub sqlite: Option<sqlite::Config>,
    pub firestore: Option<firestore::Config>,
}

/// The variables a cloud function environment conventionally provides. They rank below our own
/// prefixed variables.
fn conventional_env() -> Env {
    Env::raw()
        .only(&["GCP_PROJECT", "WEBHOOK_URL"])
        .map(|key| match key.as_str().to_ascii_uppercase().as_str() {
            "GCP_PROJECT" => "general.project_id".into(),
            _ => "notifier.webhook_url".into(),
        })
}

impl Config {
    /// Layers, lowest priority first: embedded defaults, the config file, conventional
    /// environment variables, then `BUILDHOOK_` prefixed environment variables.
    pub fn parse(path_override: Option<&str>) -> Result<Self> {
        let default_config_raw = EmbeddedConfigFS::get("default_config.toml")
            .ok_or_else(|| anyhow!("embedded default configuration is missing"))?;
        let default_config = std::str::from_utf8(&default_config_raw.data)?;

        let mut figment = Figment::new().merge(Toml::string(default_config));

        match path_override {
            Some(path) => {
                if !Path::new(path).exists() {
                    bail!("configuration file '{path}' does not exist");
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                for path in CONFIG_PATHS {
                    if Path::new(path).exists() {
                        figment = figment.merge(Toml::file(path));
                    }
                }
            }
        }

        let config: Config = figment
            .merge(conventional_env())
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Could not parse configuration")?;

        Ok(config)
    }
}
