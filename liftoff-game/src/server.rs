//! WebSocket game server.
//!
//! ```text
//! Client A ──┐                       ┌── ConnectionRegistry (players)
//!             ├── SessionHandler ────┼── RoundStateMachine ── timers
//! Client B ──┘   (one per socket)    ├── PositionRelay
//!                                    └── ProfileStore
//!                     ▲
//!                     │ per-connection outbox
//!                Broadcaster
//! ```
//!
//! Each accepted socket gets its own task that multiplexes inbound frames
//! and its outbox with `select!`. Text frames carry the JSON envelope; any
//! frame that fails to decode is logged and skipped.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::broadcast::Frame;
use crate::protocol::ClientEvent;
use crate::round::RoundConfig;
use crate::session::{GameContext, SessionHandler};
use crate::store::{JsonFileProfileStore, MemoryProfileStore, ProfileStore, StoreError};

pub const ENV_BIND_ADDR: &str = "LIFTOFF_BIND_ADDR";
pub const ENV_PROFILES: &str = "LIFTOFF_PROFILES";
pub const ENV_TICK_MS: &str = "LIFTOFF_TICK_MS";

/// Profile file shared with the login side.
pub const DEFAULT_PROFILES_PATH: &str = "data/players.json";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per connection before new ones are dropped
    pub outbox_capacity: usize,
    /// Profile store file (None = in-memory only, for tests and embedding)
    pub profiles_path: Option<PathBuf>,
    /// Round timing and crash range
    pub round: RoundConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            outbox_capacity: 256,
            profiles_path: Some(PathBuf::from(DEFAULT_PROFILES_PATH)),
            round: RoundConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `LIFTOFF_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_BIND_ADDR).filter(|a| !a.is_empty()) {
            config.bind_addr = addr;
        }
        if let Some(path) = lookup(ENV_PROFILES).filter(|p| !p.is_empty()) {
            config.profiles_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(ENV_TICK_MS) {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => config.round.tick_interval = Duration::from_millis(ms),
                _ => log::warn!("Ignoring invalid {ENV_TICK_MS}={raw:?}"),
            }
        }
        config
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    context: Arc<GameContext>,
    /// Server-wide statistics
    stats: Arc<RwLock<ServerStats>>,
}

impl GameServer {
    /// Create a server, opening the profile store named by the config.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn ProfileStore> = match &config.profiles_path {
            Some(path) => Arc::new(JsonFileProfileStore::open(path)?),
            None => Arc::new(MemoryProfileStore::new()),
        };
        log::info!("{} player profiles available", store.list().len());
        Ok(Self::with_store(config, store))
    }

    /// Create a server backed by an existing profile store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn ProfileStore>) -> Self {
        let context = Arc::new(GameContext::new(
            config.round.clone(),
            config.outbox_capacity,
            store,
        ));
        Self {
            config,
            context,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the accept loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Game server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let context = self.context.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, context, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        context: Arc<GameContext>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (session, mut outbox) = SessionHandler::connect(context).await;
        let result = Self::pump(ws_stream, addr, &session, &mut outbox, &stats).await;

        // Cleanup: leave the roster and the outbox table on every exit path
        session.disconnect().await;
        stats.write().await.active_connections -= 1;
        result
    }

    async fn pump(
        ws_stream: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        session: &SessionHandler,
        outbox: &mut mpsc::Receiver<Frame>,
        stats: &RwLock<ServerStats>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            stats.write().await.total_messages += 1;
                            match ClientEvent::decode(text.as_str()) {
                                Ok(event) => session.handle(event).await,
                                Err(e) => log::warn!("Skipping frame from {addr}: {e}"),
                            }
                        }

                        Some(Ok(Message::Binary(_))) => {
                            log::warn!("Skipping binary frame from {addr}");
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                frame = outbox.recv() => {
                    match frame {
                        Some(frame) => {
                            ws_sender.send(Message::Text(frame.to_string().into())).await?;
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Shared game state, for inspection and embedding.
    pub fn context(&self) -> &Arc<GameContext> {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PlayerIdentity, RoundState};
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn memory_config() -> ServerConfig {
        ServerConfig {
            profiles_path: None,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.outbox_capacity, 256);
        assert_eq!(config.profiles_path, Some(PathBuf::from(DEFAULT_PROFILES_PATH)));
        assert_eq!(config.round.countdown_ticks, 5);
    }

    #[test]
    fn test_config_from_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            (ENV_BIND_ADDR, "0.0.0.0:8080"),
            (ENV_PROFILES, "/srv/liftoff/players.json"),
            (ENV_TICK_MS, "250"),
        ]));
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.profiles_path, Some(PathBuf::from("/srv/liftoff/players.json")));
        assert_eq!(config.round.tick_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_config_from_env_ignores_bad_tick() {
        for raw in ["fast", "0", "-5"] {
            let config = ServerConfig::from_lookup(lookup(&[(ENV_TICK_MS, raw)]));
            assert_eq!(config.round.tick_interval, Duration::from_secs(1));
        }
    }

    #[test]
    fn test_config_from_env_empty_keeps_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.profiles_path, Some(PathBuf::from(DEFAULT_PROFILES_PATH)));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(memory_config()).unwrap();
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
        assert_eq!(server.context().round.state().await, RoundState::Waiting);
    }

    #[tokio::test]
    async fn test_server_with_profile_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("players.json");
        let config = ServerConfig {
            profiles_path: Some(path.clone()),
            ..ServerConfig::default()
        };

        let server = GameServer::new(config).unwrap();
        assert!(path.exists());
        assert!(server.context().store.list().is_empty());
    }

    #[tokio::test]
    async fn test_server_resolves_profiles_added_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("players.json");
        let config = ServerConfig {
            profiles_path: Some(path.clone()),
            ..ServerConfig::default()
        };
        let server = GameServer::new(config).unwrap();

        std::fs::write(&path, r#"{"p1": {"id": "p1", "name": "Ada", "credits": 10000}}"#).unwrap();

        let (session, _outbox) = SessionHandler::connect(server.context().clone()).await;
        session
            .handle(ClientEvent::InitializePlayer { player_id: "p1".to_string() })
            .await;
        assert_eq!(server.context().player_count().await, 1);
    }

    #[test]
    fn test_server_rejects_corrupt_profile_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("players.json");
        std::fs::write(&path, "[broken").unwrap();
        let config = ServerConfig {
            profiles_path: Some(path),
            ..ServerConfig::default()
        };
        assert!(GameServer::new(config).is_err());
    }

    #[tokio::test]
    async fn test_server_with_seeded_store() {
        let store = MemoryProfileStore::with_profiles([PlayerIdentity::new("p1", "Ada", 10)]);
        let server = GameServer::with_store(ServerConfig::default(), Arc::new(store));
        assert_eq!(server.context().store.get("p1").unwrap().name, "Ada");
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = GameServer::new(memory_config()).unwrap();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
    }
}
