//! SQLSight tool registry - service discovery for replicated tool servers

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use sqlsight::registry::RegistryService;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlsight-registry", about = "SQLSight tool registry")]
struct Args {
    /// Bind address
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port
    #[arg(long, short, default_value = "8090")]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let service = Arc::new(RegistryService::new());

    // Health prober + stale-entry sweeper.
    tokio::spawn(service.clone().run());

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Tool registry listening on {}", addr);

    axum::serve(listener, service.router()).await?;
    Ok(())
}
