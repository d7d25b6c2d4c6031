use std::sync::Arc;

use delivery_dispatch::api;
use delivery_dispatch::config::Config;
use delivery_dispatch::engine::sweeper::run_expiry_sweeper;
use delivery_dispatch::engine::tasks::run_task_worker;
use delivery_dispatch::error::AppError;
use delivery_dispatch::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let (app_state, task_rx) = AppState::new(
        config.policy.clone(),
        config.task_queue_size,
        config.event_buffer_size,
    );
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_task_worker(shared_state.task_runner.clone(), task_rx));
    tokio::spawn(run_expiry_sweeper(
        shared_state.engine.clone(),
        config.sweep_interval,
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        sweep_interval_secs = config.sweep_interval.as_secs(),
        auto_assign_on_create = config.policy.auto_assign_on_create,
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
