mod api;
mod config;
mod server;
mod store;

use crate::config::AppConfig;
use crate::server::AppState;
use crate::store::ScriptStore;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "scriptkeeper",
    about = "Serve a managed script with versioned backups and rollback"
)]
struct Cli {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
    /// Directory served at the root (overrides PUBLIC_DIR)
    #[arg(long)]
    public_dir: Option<PathBuf>,
    /// Directory for the version record and backups (overrides DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(port) = cli.port {
        config.bind_addr.set_port(port);
    }
    if let Some(dir) = cli.public_dir {
        config.public_dir = dir;
    }
    if let Some(dir) = cli.data_dir {
        config.data_root = dir;
    }

    let store = ScriptStore::open(config.public_dir.clone(), config.data_root.clone()).await?;
    store.seed().await?;
    let state = AppState::new(config.clone(), Arc::new(store));

    let addr = config.bind_addr;
    tracing::info!(%addr, "starting scriptkeeper server");
    server::run(addr, state).await?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
