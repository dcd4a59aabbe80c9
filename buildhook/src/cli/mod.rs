mod handle;
mod service;

use crate::conf::Config;
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[clap(name = "buildhook")]
#[clap(about = "Buildhook turns uploaded source archives into managed builds.")]
#[clap(
    long_about = "Buildhook turns uploaded source archives into managed builds.\n\n It reacts to objects \
    landing in storage by handing them to a build service, waiting for the build to finish, then \
    recording the result and posting it to a webhook."
)]
#[clap(version)]
pub struct Cli {
    /// Set configuration path; if empty default paths are used
    #[clap(long, value_name = "PATH")]
    config_path: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manages service related commands.
    Service(service::ServiceSubcommands),

    /// Run a single storage event through the build lifecycle and print the result.
    Handle(handle::HandleArgs),
}

/// Logs always go to stderr so that command output on stdout stays machine readable.
fn init_logging(config: &Config) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.general.log_level))
        .map_err(|e| {
            anyhow!(
                "could not parse log level '{}'; {e}",
                config.general.log_level
            )
        })?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.general.pretty_logging {
        registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| anyhow!("could not init logging; {e}"))
}

impl Cli {
    pub fn new() -> Self {
        Cli::parse()
    }

    pub async fn run(self) -> Result<()> {
        let config = Config::parse(self.config_path.as_deref())?;

        init_logging(&config)?;

        match &self.command {
            Commands::Service(service) => {
                self.handle_service_subcommands(service.clone(), config)
                    .await
            }
            Commands::Handle(args) => handle::handle(args.clone(), config).await,
        }
    }
}
