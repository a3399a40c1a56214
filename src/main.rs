use std::process::ExitCode;
use std::sync::Arc;

use axum::routing::{any, get};
use axum::Router;
use podlb::dispatcher::{Dispatcher, Strategy};
use podlb::registry::PodRegistry;
use podlb::runtime::DockerRuntime;
use podlb::state::AppState;
use podlb::supervisor::Supervisor;
use podlb::{admin, config, proxy};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cfg = config::load()?;
    info!(deployment = %cfg.deployment.name, "configuration loaded");

    let runtime = Arc::new(DockerRuntime::new(
        cfg.docker.executable_path.clone(),
        cfg.docker.environment.clone(),
    ));

    info!("sweeping orphaned pod containers");
    if let Err(e) = runtime.cleanup_orphans().await {
        error!(error = %e, "orphan cleanup failed, continuing anyway");
    }

    let registry = Arc::new(PodRegistry::new());
    let supervisor = Arc::new(Supervisor::new(Arc::clone(&registry), runtime));

    supervisor
        .deploy(cfg.deployment.clone())
        .await
        .map_err(|e| anyhow::anyhow!("deployment failed: {e}"))?;

    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        dispatcher: Dispatcher::new(Strategy::RoundRobin),
        http_client: reqwest::Client::new(),
        deployment_name: cfg.deployment.name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let app = Router::new()
        .route("/health", get(admin::health))
        .fallback(any(proxy::handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    info!(addr, "starting server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped, shutting down supervisor");
    supervisor.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
