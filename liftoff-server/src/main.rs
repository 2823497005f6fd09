//! Liftoff: multiplayer crash-game server.
//!
//! Configuration comes from the environment:
//!
//! - `LIFTOFF_BIND_ADDR`: listen address (default `127.0.0.1:9090`)
//! - `LIFTOFF_PROFILES`: player profile JSON file (default: `data/players.json`)
//! - `LIFTOFF_TICK_MS`: countdown / round-wait tick length in ms
//!
//! `RUST_LOG` controls verbosity.

use log::info;
use liftoff_game::server::{GameServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!(
        "Liftoff starting: bind {}, profiles {}, tick {:?}",
        config.bind_addr,
        config
            .profiles_path
            .as_ref()
            .map_or_else(|| "in-memory".to_string(), |p| p.display().to_string()),
        config.round.tick_interval,
    );

    let server = GameServer::new(config)?;
    server.run().await
}
