//! uarpc - binary RPC server for industrial automation
//!
//! Serves the generic request/response envelope over TCP with trust-gated
//! channel establishment. The default handler is the loopback diagnostic
//! service; real deployments embed `uarpc-server` with their own handler.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uarpc_server::{Config, LoopbackHandler, Server, ServerConfig};
use uarpc_trust::{DirectoryTrustStore, StoreTrustGate, TrustDecision};
use uarpc_wire::EncodingContext;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if UARPC_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("UARPC_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            if std::env::var("UARPC_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting uarpc server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max message size: {} bytes", config.limits.max_message_size);
    tracing::info!("  Trust store: {}", config.trust.store_dir.display());

    let store = Arc::new(DirectoryTrustStore::open(&config.trust.store_dir)?);
    let gate = if config.trust.accept_unknown {
        tracing::warn!("  Trust: accepting unknown certificates (commissioning mode)");
        StoreTrustGate::new(store).with_decider(|_, _| TrustDecision::AcceptPermanently)
    } else {
        tracing::info!("  Trust: only certificates already in the store");
        StoreTrustGate::new(store)
    };

    let mut context = EncodingContext::default();
    context.limits = config.limits.to_encoding_limits();
    let server_config = ServerConfig::new(config.network.bind_addr)
        .with_context(context)
        .with_max_connections(config.network.max_connections)
        .with_idle_timeout(config.network.idle_timeout());

    let server = Arc::new(Server::new(
        server_config,
        Arc::new(LoopbackHandler),
        Arc::new(gate),
    ));

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    server.run().await?;
    tracing::info!("Server stopped");
    Ok(())
}
