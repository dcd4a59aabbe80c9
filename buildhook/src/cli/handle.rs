use crate::{conf::Config, models::StorageEvent, orchestrator::Orchestrator};
use anyhow::{Context, Result};
use clap::Args;

#[derive(Debug, Args, Clone)]
pub struct HandleArgs {
    /// Container (bucket) the object was uploaded to.
    #[clap(long)]
    pub container: String,

    /// Key of the uploaded object.
    #[clap(long)]
    pub object_key: String,

    /// Identifies the run; generated when omitted. Reusing one overwrites that run's result.
    #[clap(long)]
    pub correlation_id: Option<String>,
}

/// A build that fails still exits zero; the printed record carries the outcome.
pub async fn handle(args: HandleArgs, config: Config) -> Result<()> {
    let orchestrator = Orchestrator::from_config(&config).await?;

    let event = StorageEvent::new(
        &args.container,
        &args.object_key,
        args.correlation_id.as_deref(),
    );

    let record = orchestrator.handle(event).await;

    let output =
        serde_json::to_string_pretty(&record).context("Could not serialize result record")?;
    println!("{output}");

    Ok(())
}
