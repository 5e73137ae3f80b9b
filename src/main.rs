//! Service binary: configuration, tracing, wiring, and the HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use context_engine::{
    BreakerRegistry, ContextEngine, EngineConfig, GraphClient, HttpGraphTransport, MemoryCaseStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = EngineConfig::from_env();
    let port = config.service_port;

    let breakers =
        BreakerRegistry::new(config.breaker_failure_threshold, config.breaker_open_duration);
    let transport = Arc::new(HttpGraphTransport::new(config.graph_endpoint.clone())?);
    let graph = Arc::new(GraphClient::new(
        transport,
        breakers.breaker_for(&config.graph_endpoint),
        config.graph_timeout,
        config.graph_max_retries,
        config.graph_retry_base,
    ));

    // Demo wiring: deployments substitute their CaseDB-backed `CaseStore`.
    let store = Arc::new(MemoryCaseStore::new());

    tracing::info!(
        graph_endpoint = %config.graph_endpoint,
        memory_cache = config.enable_memory_cache,
        persistent_cache = config.enable_persistent_cache,
        "starting context engine"
    );

    let engine = Arc::new(ContextEngine::new(config, graph, store));
    engine.start_sweeper();

    let app = context_engine::http::router(engine);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
