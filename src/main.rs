use axum::Router;
use tower_http::services::ServeDir;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bandwidth_scheduler::config::Config;
use bandwidth_scheduler::store::ScheduleStore;
use bandwidth_scheduler::{api_router, watcher, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let state = AppState::new(ScheduleStore::new(&config.db_path));

    // Fail fast on a corrupt store rather than serving errors
    let schedules = state.store.list().await?;
    info!(count = schedules.len(), path = %config.db_path.display(), "loaded schedules");

    let watcher = tokio::spawn(watcher::run(
        state.store.clone(),
        state.snapshot.clone(),
        state.recheck.clone(),
        config.check_interval,
    ));

    let app = Router::new()
        .nest("/api", api_router(state))
        .nest_service("/", ServeDir::new(&config.static_dir));

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("server running at http://{}", config.bind);
    info!("  static files: {}", config.static_dir.display());
    info!("  api base:     http://{}/api", config.bind);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutting down");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    watcher.abort();
    Ok(())
}
