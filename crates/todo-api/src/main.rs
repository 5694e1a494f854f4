//! todo-api バイナリのエントリポイント

use anyhow::{anyhow, Context, Result};
use shared::{init_tracing, LogFormat, ServerConfig};
use todo_api::{app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(LogFormat::Json).map_err(|e| anyhow!(e))?;

    let config = ServerConfig::from_env()?;
    let state = AppState::from_config(&config)?;

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, environment = %config.environment, origin = %config.allowed_origin, "server starting");

    axum::serve(listener, app(state))
        .await
        .context("server error")?;
    Ok(())
}
