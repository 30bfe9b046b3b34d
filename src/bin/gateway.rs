//! SQLSight gateway - HTTP façade, saga stage workers, and KB ingestion
//!
//! One process runs the whole single-node deployment: the query API, the
//! per-topic stage worker pools, the knowledge-base ingestion consumer, and
//! the background sweepers. Scale-out deployments run several of these
//! against shared PostgreSQL-backed collaborators.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sqlsight::agent::{LlmProvider, MockLlmClient, OpenRouterClient};
use sqlsight::config::{load_config, validate_config};
use sqlsight::core::{MemoryBus, MemoryStateStore, MemoryVectorStore, StateStore, VectorStore};
use sqlsight::database::{self, PgStateStore, PgVectorStore};
use sqlsight::gateway::{router, AppState};
use sqlsight::kb::{
    CachedEmbedder, Embedder, FastEmbedder, HashEmbedder, IngestPipeline, RetrievalQa,
};
use sqlsight::mcp::McpHttpClient;
use sqlsight::registry::RegistryClient;
use sqlsight::saga::{Orchestrator, SagaStore, StageContext};
use sqlsight::tools::RemoteToolClient;

#[derive(Parser)]
#[command(name = "sqlsight-gateway", about = "SQLSight query gateway and saga workers")]
struct Args {
    /// Bind address (overrides configuration)
    #[arg(long)]
    bind: Option<String>,

    /// Port (overrides configuration)
    #[arg(long, short)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = load_config()?;

    let validation = validate_config(&config);
    for warning in &validation.warnings {
        warn!("Config: {}", warning);
    }
    if !validation.is_valid() {
        for error in &validation.errors {
            eprintln!("Config error: {}", error);
        }
        anyhow::bail!("invalid configuration");
    }

    // --- Collaborators -----------------------------------------------------

    let provider: Arc<dyn LlmProvider> = if config.llm.mock {
        info!("Using the deterministic mock LLM client");
        Arc::new(MockLlmClient::canned())
    } else {
        Arc::new(OpenRouterClient::new(config.llm.clone())?)
    };

    let embedder: Arc<dyn Embedder> = match config.embedding.backend.as_str() {
        "hash" => Arc::new(HashEmbedder::default()),
        _ => Arc::new(FastEmbedder::new()?),
    };
    let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(embedder));

    let (state_store, vector_store): (Arc<dyn StateStore>, Arc<dyn VectorStore>) =
        match &config.database.url {
            Some(url) => {
                let pool = database::init_pool(url).await?;
                database::migrations::run(&pool).await?;

                let state = PgStateStore::new(pool.clone());
                let state_for_sweep = state.clone();
                tokio::spawn(async move {
                    let mut tick = tokio::time::interval(Duration::from_secs(60));
                    loop {
                        tick.tick().await;
                        if let Err(e) = state_for_sweep.sweep().await {
                            warn!("State sweep failed: {}", e);
                        }
                    }
                });

                (Arc::new(state), Arc::new(PgVectorStore::new(pool)))
            }
            None => {
                let state = MemoryStateStore::new();
                let state_for_sweep = state.clone();
                tokio::spawn(async move {
                    let mut tick = tokio::time::interval(Duration::from_secs(60));
                    loop {
                        tick.tick().await;
                        state_for_sweep.sweep().await;
                    }
                });

                (Arc::new(state), Arc::new(MemoryVectorStore::new()))
            }
        };

    let bus = Arc::new(MemoryBus::new());
    let visibility = Duration::from_secs(config.bus.visibility_timeout_secs);
    let bus_for_sweep = bus.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(visibility / 2);
        loop {
            tick.tick().await;
            let redelivered = bus_for_sweep.redeliver_expired(visibility).await;
            if redelivered > 0 {
                warn!("Redelivered {} expired in-flight messages", redelivered);
            }
        }
    });

    let registry = Arc::new(RegistryClient::new(&config.registry.url)?);
    let mcp = McpHttpClient::new(Duration::from_secs(config.saga.tool_timeout_secs))?;
    let dispatcher = Arc::new(RemoteToolClient::new(registry, mcp));

    // --- Saga workers ------------------------------------------------------

    let ctx = Arc::new(StageContext {
        store: SagaStore::new(state_store),
        bus: bus.clone(),
        provider: provider.clone(),
        dispatcher,
        loop_config: config.saga.loop_config(),
        saga_deadline: config.saga.deadline(),
    });

    let worker_handles = Orchestrator::new(ctx.clone())
        .with_workers(config.saga.workers_per_topic)
        .spawn();
    info!("Started {} stage workers", worker_handles.len());

    // --- Knowledge base ----------------------------------------------------

    let pipeline = Arc::new(IngestPipeline::new(
        embedder.clone(),
        vector_store.clone(),
        config.chunker.clone(),
    ));
    tokio::spawn(pipeline.run_consumer(bus.clone()));

    let qa = Arc::new(RetrievalQa::new(embedder, vector_store, provider));

    // --- HTTP surface ------------------------------------------------------

    let bind = args.bind.unwrap_or_else(|| config.gateway.bind.clone());
    let port = args.port.unwrap_or(config.gateway.port);
    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;

    let app = router(AppState { ctx, qa });
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
