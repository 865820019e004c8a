//! Figures Server
//!
//! Extracts figures and tables from PDF documents through pdffigures2,
//! with bounded engine concurrency, per-client rate limiting and
//! background cleanup of stale files.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use figures_server::engine::JavaLauncher;
use figures_server::{router, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();

    let (config, config_problems) = Config::from_env();
    let log_level = config.log_level.clone();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("figures_server={log_level},tower_http={log_level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    for problem in &config_problems {
        tracing::warn!("{}, using the default", problem);
    }

    tracing::info!("Starting Figures Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("pdffigures2 jar: {}", config.engine.jar_path.display());
    tracing::info!(
        workers = config.limits.worker_pool_size,
        engine_timeout_secs = config.engine.timeout.as_secs(),
        queue_timeout_secs = config.limits.queue_timeout.as_secs(),
        "Engine limits"
    );
    if !config.engine.jar_path.is_file() {
        tracing::warn!(
            "pdffigures2 jar not found at {}; extractions will fail until it is installed",
            config.engine.jar_path.display()
        );
    }

    // Create application state
    let app_state = AppState::new(config.clone(), Arc::new(JavaLauncher))
        .context("Failed to initialize application state")?;
    tracing::info!("Uploads: {}", app_state.upload_root().display());
    tracing::info!("Output: {}", app_state.output_root().display());

    // Start background cleanup
    let cleanup = if config.cleanup.enabled {
        Some(app_state.cleanup_worker().start())
    } else {
        tracing::info!("Cleanup disabled");
        None
    };

    let app = router(app_state);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;
    tracing::info!("Figures Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    if let Some(handle) = cleanup {
        handle.stop().await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
