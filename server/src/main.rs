use anyhow::Result;
use clap::Parser;
use server::args::Args;
use server::configs::config_provider::{ConfigProvider, FileConfigProvider};
use server::streaming::consensus::LogOnlyConsensus;
use server::streaming::state_machine::InMemoryStateMachine;
use server::streaming::system::StreamSystem;
use server::tcp::tcp_server;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_provider = FileConfigProvider::new(args.config);
    let config = Arc::new(config_provider.load_config().await?);
    info!(
        "Starting RaftStream server with {} peer(s)...",
        config.stream.peers.len()
    );

    let system = Arc::new(StreamSystem::new(
        config,
        Arc::new(InMemoryStateMachine::new()),
        Arc::new(LogOnlyConsensus),
    ));
    tcp_server::start(system.clone()).await;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping RaftStream server...");
    system.shutdown().await;
    Ok(())
}
