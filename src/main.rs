mod api;
mod auth;
mod config;
mod coordinator;
mod engine;
mod error;
mod events;
mod geo;
mod models;
mod observability;
mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::auth::{ActorRole, Identity, TokenTable};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let verifier = Arc::new(TokenTable::new());
    if let Some(token) = &config.admin_token {
        verifier.insert(
            token.clone(),
            Identity {
                id: Uuid::new_v4(),
                role: ActorRole::Admin,
            },
        );
        tracing::info!("admin token registered");
    }

    let shared_state = Arc::new(state::AppState::new(config.clone(), verifier));
    let app = api::rest::router(shared_state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
