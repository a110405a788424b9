//! The `palisade` binary: load configuration, wire the context, serve.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use palisade_core::config::EnforcerConfig;

/// API-gateway enforcer: per-request ALLOW/DENY decisions for a proxy.
#[derive(Debug, Parser)]
#[command(name = "palisade", version, about)]
struct Args {
    /// Path to the JSON5 configuration file.
    #[arg(short, long, env = "PALISADE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listener port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match EnforcerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "could not load configuration");
                return ExitCode::FAILURE;
            }
        },
        None => EnforcerConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if let Err(e) = palisade_gateway::start(config).await {
        tracing::error!(error = %e, "enforcer stopped");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
