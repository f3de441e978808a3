use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use reviewbot::config::Config;
use reviewbot::github::GitHubClient;
use reviewbot::webhook::webhook_router;
use reviewbot::workspace::Workspaces;
use reviewbot::AppState;

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "reviewbot"
    }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting reviewbot");

    let config = Config::from_env()?;

    let github_client = GitHubClient::new(config.access_token.clone())?;
    let workspaces = Workspaces::new(
        config.repos_dir.clone(),
        config.git_remote_base(),
        config.git_timeout,
    )?;
    info!("Workspaces rooted at {}", config.repos_dir.display());

    let app_state = Arc::new(AppState {
        github_client,
        workspaces,
        webhook_secret: config.webhook_secret.clone(),
        merge_policy: config.merge_policy,
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
