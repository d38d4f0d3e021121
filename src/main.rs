//! Stop Arena Server
//!
//! Runs the match engine behind the WebSocket gateway.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stop_arena::{
    game::rewards::MemoryLedger,
    network::{GameServer, IdentityConfig, ServerConfig},
    EngineConfig, EventHub, MatchEngine, MemoryLexicon, MemoryStore, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let default_level = if cfg!(feature = "debug-tracing") { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Stop Arena Server v{}", VERSION);

    let engine_config = EngineConfig::from_env();
    let server_config = ServerConfig::from_env();
    let identity = IdentityConfig::from_env();

    if !identity.is_configured() {
        if identity.allow_insecure_ids {
            warn!("No token validation configured, accepting raw player ids");
        } else {
            warn!("No token validation configured, every login will be rejected");
        }
    }

    let lexicon = match std::env::var("STOP_LEXICON_PATH") {
        Ok(path) => MemoryLexicon::from_path(&path)
            .with_context(|| format!("loading lexicon from {}", path))?,
        Err(_) => {
            warn!("STOP_LEXICON_PATH not set, starting with an empty lexicon");
            MemoryLexicon::new()
        }
    };
    info!(
        pairs = lexicon.pair_count(),
        rounds = engine_config.round_count,
        round_secs = engine_config.round_duration_secs(),
        "Engine configured"
    );

    let engine = MatchEngine::new(
        engine_config,
        Arc::new(MemoryStore::new()),
        Arc::new(lexicon),
        Arc::new(MemoryLedger::new()),
        EventHub::default(),
    );

    let server = Arc::new(GameServer::new(server_config, identity, engine));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            signal_server.shutdown();
        }
    });

    server.run().await.context("game server failed")?;
    info!("Server stopped");
    Ok(())
}
