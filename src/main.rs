use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hivegate::config::{HivegateConfig, StoreBackend, StoreConfig};
use hivegate::gate::Gate;
use hivegate::ratelimit::{spawn_cleanup_task, LimiterSettings, RateLimiter};
use hivegate::server::HttpServer;
use hivegate::store::{CounterStore, MemoryCounterStore, RedisCounterStore};

/// Distributed request-admission gate.
#[derive(Debug, Parser)]
#[command(name = "hivegate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "HIVEGATE_CONFIG")]
    config: Option<String>,

    /// Redis URL; selects the Redis counter store
    #[arg(long, env = "HIVEGATE_REDIS_URL")]
    redis_url: Option<String>,

    /// HTTP listen address, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Hivegate request-admission service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = HivegateConfig::load(args.config.as_deref())?;
    if let Some(url) = args.redis_url {
        config.store.backend = StoreBackend::Redis;
        config.store.redis_url = url;
    }
    if let Some(addr) = args.listen {
        config.server.http_addr = addr;
    }
    info!(
        http_addr = %config.server.http_addr,
        store = ?config.store.backend,
        enabled = config.rate_limiting.enabled,
        "Configuration loaded"
    );

    let store = build_store(&config.store).await;
    let limiter = Arc::new(RateLimiter::new(
        store,
        LimiterSettings::from(&config.rate_limiting),
    ));
    info!("Rate limiter initialized");

    let cleanup = spawn_cleanup_task(limiter.clone(), config.rate_limiting.cleanup_interval());

    let gate = Arc::new(Gate::from_config(limiter, &config.rate_limiting)?);
    let server = HttpServer::new(config.server.http_addr, gate);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    cleanup.abort();
    info!("Hivegate stopped");
    Ok(())
}

/// Construct the configured counter store.
///
/// An unreachable Redis at startup degrades to the in-process store so the
/// service still enforces limits per instance.
async fn build_store(config: &StoreConfig) -> Arc<dyn CounterStore> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-process counter store");
            Arc::new(MemoryCounterStore::new())
        }
        StoreBackend::Redis => match RedisCounterStore::connect(config.redis()).await {
            Ok(store) => {
                info!(url = %config.redis_url, "Using Redis counter store");
                Arc::new(store)
            }
            Err(e) => {
                warn!(
                    url = %config.redis_url,
                    error = %e,
                    "Redis unavailable, falling back to in-process counter store"
                );
                Arc::new(MemoryCounterStore::new())
            }
        },
    }
}

/// Resolve on SIGINT or SIGTERM. A handler that cannot be installed never fires.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    info!(signal = received, "Draining in-flight requests before exit");
}
