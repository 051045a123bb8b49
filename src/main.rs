mod app;
mod auth;
mod config;
mod error;
mod groups;
mod images;
mod inference;
mod kv;
mod nutrition;
mod photos;
mod ratelimit;
mod state;
mod storage;
mod text;

#[cfg(test)]
mod test_utils;

use crate::config::AppConfig;
use crate::inference::worker::Worker;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "mealscan=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let role = config.role;
    let state = AppState::init(config).await?;

    if role.runs_workers() {
        for worker_no in 0..state.config.pipeline.worker_concurrency {
            tokio::spawn(Worker::from_state(&state).run(worker_no));
        }
    }

    if role.serves_http() {
        app::serve(app::build_app(state)).await?;
    } else {
        tracing::info!("worker-only role, waiting for ctrl-c");
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}
