mod api;
mod archive;
mod build_service;
mod cli;
mod conf;
mod credentials;
mod document_store;
mod models;
mod notifier;
mod object_store;
mod orchestrator;
#[cfg(test)]
mod testing;
mod workspace;

use human_panic::setup_panic;

#[tokio::main]
async fn main() {
    setup_panic!();

    let cli = cli::Cli::new();

    if let Err(e) = cli.run().await {
        eprintln!("Error: {e:?}");
        std::process::exit(1)
    }
}
