//! Tower Clash Game Server
//!
//! Loads configuration from the environment, then serves WebSocket clients
//! until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tower_clash::{
    network::{AuthConfig, GameServer, PlayerRegistry, ServerConfig},
    ContentSource, JsonContent, SessionContext, MATCH_DURATION_SECS, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("Tower Clash Server v{}", VERSION);

    let config = ServerConfig::from_env()?;
    let auth = AuthConfig::from_env();
    info!("Match Duration: {} seconds (timed mode)", MATCH_DURATION_SECS);
    info!(
        "Content: {} / {}",
        config.troops_path.display(),
        config.towers_path.display()
    );
    if auth.is_configured() {
        info!("Token login enabled");
    }

    let content = JsonContent::new(config.troops_path.clone(), config.towers_path.clone());
    // Sessions reload content on start; this only surfaces a bad setup early.
    if let Err(e) = content
        .load_troop_catalog()
        .and_then(|_| content.load_tower_template())
    {
        warn!("Content check failed: {}", e);
    }

    let ctx = SessionContext::new(Arc::new(content), Arc::new(PlayerRegistry::new()));
    let server = Arc::new(GameServer::new(config, auth, ctx));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_server.shutdown();
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
