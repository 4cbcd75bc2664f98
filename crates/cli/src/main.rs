//! The `torbo` binary: load config, build gateway state, serve.

use std::{path::PathBuf, process::ExitCode};

use {
    clap::Parser,
    tracing::{info, warn},
    tracing_subscriber::EnvFilter,
};

use torbo_providers::LocalDaemon;

#[derive(Debug, Parser)]
#[command(name = "torbo", version, about = "Local-first AI gateway")]
struct Cli {
    /// Config file path (default: torbo.toml, then the user config dir).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the data directory (keychain, audit log).
    #[arg(long, env = "TORBO_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Override the listen port.
    #[arg(long, env = "TORBO_PORT")]
    port: Option<u16>,

    /// Bind on all interfaces instead of loopback.
    #[arg(long)]
    lan: bool,

    /// Advertise a pairing code at startup.
    #[arg(long)]
    pair: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // One-line diagnostic; detail is already in the logs.
            eprintln!("torbo: {e}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(ref dir) = cli.data_dir {
        torbo_config::set_data_dir(dir.clone());
    }

    let mut config = match cli.config {
        Some(ref path) => torbo_config::load_config(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            torbo_config::TorboConfig::default()
        }),
        None => torbo_config::discover_and_load(),
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if cli.lan {
        config.gateway.lan_access = true;
    }

    let data_dir = torbo_config::data_dir();
    info!(data_dir = %data_dir.display(), port = config.gateway.port, "starting torbo");

    let state = torbo_gateway::GatewayState::open(config, &data_dir).await;

    // Best-effort: have the local daemon up before the first request.
    if LocalDaemon::is_installed() {
        if let Err(e) = state.daemon.ensure_running().await {
            warn!(error = %e, "local daemon unavailable, relying on cloud providers");
        }
    } else {
        info!("no local inference daemon found");
    }

    if cli.pair {
        let code = state.pairing.begin_pairing().await;
        info!(%code, "pairing code active for 5 minutes");
    }

    torbo_gateway::serve(state).await
}
