use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fulcra_context_mcp::config::{load_config, TransportMode, ENV_CONFIG_PATH};
use fulcra_context_mcp::http_transport::run_http_server;
use fulcra_context_mcp::server::{run_local, Server};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config.toml. Defaults to the user config directory.
    #[arg(long, env = ENV_CONFIG_PATH)]
    config: Option<PathBuf>,

    /// Address the HTTP server binds to in remote mode.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries JSON-RPC in local mode.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("fulcra_context_mcp=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    let transport = config.transport;
    info!(
        ?transport,
        version = %config.version,
        fulcra_api_url = %config.fulcra_api_url,
        oauth_configured = !config.oauth.client_id.is_empty(),
        "Starting Fulcra Context MCP server"
    );

    let server = Arc::new(Server::from_config(config)?);

    let result = match transport {
        TransportMode::Local => run_local(server).await,
        TransportMode::Remote => run_http_server(server).await,
    };

    if let Err(e) = result {
        error!(error = %e, "Server encountered an error");
        std::process::exit(1);
    }

    Ok(())
}
