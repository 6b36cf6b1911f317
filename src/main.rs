//! MCP Registry - gateway and registry for Model Context Protocol servers.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mcp_registry_gateway::{app::App, cli::Cli, config::Config, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        data_root = %config.data_root.path,
        "starting mcp registry"
    );

    if let Err(e) = App::new(config).run().await {
        error!("registry error: {e}");
        return ExitCode::FAILURE;
    }

    info!("registry shutdown complete");
    ExitCode::SUCCESS
}
