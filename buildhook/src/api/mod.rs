mod events;
mod system;

use crate::{conf, orchestrator::Orchestrator};
use anyhow::{anyhow, Context, Result};
use dropshot::{
    ApiDescription, ConfigDropshot, ConfigLogging, ConfigLoggingLevel, HandlerTaskMode,
    HttpServer, HttpServerStarter,
};
use std::{str::FromStr, sync::Arc};
use tracing::{error, info};

pub const BUILD_SEMVER: &str = env!("BUILD_SEMVER");
pub const BUILD_COMMIT: &str = env!("BUILD_COMMIT");

/// Shared by every request handler.
#[derive(Debug)]
pub struct ApiState {
    pub orchestrator: Orchestrator,
}

fn init_api() -> Result<ApiDescription<Arc<ApiState>>> {
    let mut api = ApiDescription::new();

    /* /api/events */
    api.register(events::handle_event)
        .map_err(|e| anyhow!("could not register endpoint; {e}"))?;

    /* /api/system */
    api.register(system::get_system_info)
        .map_err(|e| anyhow!("could not register endpoint; {e}"))?;

    Ok(api)
}

/// Starts the HTTP trigger service and blocks until it shuts down.
pub async fn start_web_service(conf: conf::Config) -> Result<()> {
    let bind_address = std::net::SocketAddr::from_str(&conf.server.bind_address).with_context(|| {
        format!(
            "Could not parse url '{}' while trying to bind binary to port; \
    should be in format '<ip>:<port>'; Please be sure to use an ip instead of something like 'localhost', \
    when attempting to bind",
            &conf.server.bind_address
        )
    })?;

    let orchestrator = Orchestrator::from_config(&conf).await?;
    let api_state = Arc::new(ApiState { orchestrator });

    let dropshot_conf = ConfigDropshot {
        bind_address,
        // Runs carry on to completion even if the caller hangs up.
        default_handler_task_mode: HandlerTaskMode::Detached,
        ..Default::default()
    };

    // Dropshot insists on its own logger; we keep it quiet and log through tracing instead.
    let log = ConfigLogging::StderrTerminal {
        level: ConfigLoggingLevel::Warn,
    }
    .to_logger("buildhook")
    .map_err(|error| anyhow!("failed to create server logger: {}", error))?;

    let server = HttpServerStarter::new(&dropshot_conf, init_api()?, api_state, &log)
        .map_err(|error| anyhow!("failed to create server: {}", error))?
        .start();

    let shutdown = server.wait_for_shutdown();

    tokio::spawn(wait_for_shutdown_signal(server));

    info!(
        message = "Started buildhook http service",
        host = %bind_address.ip(),
        port = %bind_address.port(),
    );

    shutdown
        .await
        .map_err(|error| anyhow!("Server encountered errors while running; {:#?}", error))
}

async fn wait_for_shutdown_signal(server: HttpServer<Arc<ApiState>>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Could not install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Could not install terminate signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down http service");

    if let Err(e) = server.close().await {
        error!(error = %e, "Http service did not shut down cleanly");
    }
}
