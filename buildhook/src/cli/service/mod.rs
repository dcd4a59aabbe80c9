use crate::{api::start_web_service, cli::Cli, conf::Config};
use anyhow::Result;
use clap::{Args, Subcommand};

#[derive(Debug, Args, Clone)]
pub struct ServiceSubcommands {
    #[clap(subcommand)]
    pub command: ServiceCommands,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ServiceCommands {
    /// Start the http trigger service.
    Start,
}

impl Cli {
    pub async fn handle_service_subcommands(
        &self,
        command: ServiceSubcommands,
        config: Config,
    ) -> Result<()> {
        let cmds = command.command;
        match cmds {
            ServiceCommands::Start => start_web_service(config).await,
        }
    }
}
