use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use basepod::api;
use basepod::config::BasepodConfig;
use basepod::engine::{DockerEngine, EngineOps, APP_NETWORK};
use basepod::routes::{CaddyRoutes, RouteOps};
use basepod::state::AppState;
use basepod::store::{AppStore, MemoryStore};
use basepod::supervisor::CoreSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting Basepod v{}", env!("CARGO_PKG_VERSION"));

    // Load and validate configuration
    let config = BasepodConfig::load()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Configuration validation failed")?;
    info!("Configuration loaded: bind={}, root_domain={}", config.bind_address, config.root_domain);

    // Prepare the on-disk layout
    for dir in ["builds", "data/apps", "logs"] {
        std::fs::create_dir_all(config.base_dir.join(dir))
            .with_context(|| format!("Could not create {} under {}", dir, config.base_dir.display()))?;
    }

    // Connect to the container engine
    info!(
        "Connecting to container engine at: {}",
        if config.docker_socket.is_empty() { "default socket" } else { &config.docker_socket }
    );
    let engine = DockerEngine::new(&config.docker_socket).map_err(|e| {
        error!("Failed to connect to container engine: {}", e);
        anyhow::anyhow!("{}", e)
    })?;
    match EngineOps::ping(&engine).await {
        Ok(()) => info!("Container engine reachable"),
        Err(e) => warn!("Container engine not reachable yet: {}", e),
    }
    if let Err(e) = EngineOps::ensure_network(&engine, APP_NETWORK).await {
        warn!("Could not ensure app network '{}': {}", APP_NETWORK, e);
    }
    let engine: Arc<dyn EngineOps> = Arc::new(engine);

    // Route manager over the proxy admin API
    let routes: Arc<dyn RouteOps> = Arc::new(CaddyRoutes::new(
        &config.caddy_admin_url,
        &config.caddy_server_name,
    ));
    match routes.ping().await {
        Ok(()) => info!("Reverse proxy admin API reachable"),
        Err(e) => warn!("Reverse proxy admin API not reachable: {}", e),
    }

    let store: Arc<dyn AppStore> = Arc::new(MemoryStore::new());

    // Shared state + background controllers
    let mut supervisor = CoreSupervisor::new();
    let state = AppState::new(
        config.clone(),
        engine,
        routes,
        store,
        supervisor.shutdown_sender(),
    );
    supervisor.start(&state);

    // Routes are a pure function of persisted app state; reinstall them
    // so proxy and store agree from the first request.
    if let Err(e) = state.deployer.sync_routes().await {
        warn!("Startup route sync failed: {}", e);
    }

    let app = api::build_router(state);

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Basepod is ready!");
    info!("Listening on: http://{}", addr);
    info!("  - Dashboard host: {}", config.dashboard_host());
    info!("  - Deploy endpoint: POST /deploy");
    info!("  - Health check: GET /health");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    supervisor.stop().await;
    info!("Server shut down gracefully");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "basepod=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Graceful shutdown signal handler.
/// Listens for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
