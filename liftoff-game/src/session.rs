//! Per-connection session handling.
//!
//! [`GameContext`] is the single owner of process-wide game state. It is
//! created once at server start and shared by every [`SessionHandler`],
//! which translates one connection's inbound events into registry, round
//! and relay calls.

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::broadcast::{Broadcaster, Frame};
use crate::protocol::{ClientEvent, ConnectionId, RoundState, ServerEvent};
use crate::registry::ConnectionRegistry;
use crate::relay::PositionRelay;
use crate::round::{RoundConfig, RoundStateMachine};
use crate::store::ProfileStore;

/// Shared game state: roster, round, fan-out and profile lookup.
pub struct GameContext {
    pub registry: Arc<RwLock<ConnectionRegistry>>,
    pub broadcaster: Arc<Broadcaster>,
    pub round: RoundStateMachine,
    pub relay: PositionRelay,
    pub store: Arc<dyn ProfileStore>,
}

impl GameContext {
    pub fn new(
        round_config: RoundConfig,
        outbox_capacity: usize,
        store: Arc<dyn ProfileStore>,
    ) -> Self {
        let registry = Arc::new(RwLock::new(ConnectionRegistry::new()));
        let broadcaster = Arc::new(Broadcaster::new(outbox_capacity));
        let round = RoundStateMachine::new(round_config, registry.clone(), broadcaster.clone());
        let relay = PositionRelay::new(broadcaster.clone());
        Self {
            registry,
            broadcaster,
            round,
            relay,
            store,
        }
    }

    pub async fn player_count(&self) -> usize {
        self.registry.read().await.count()
    }
}

/// Controller for one connection.
pub struct SessionHandler {
    connection_id: ConnectionId,
    context: Arc<GameContext>,
}

impl SessionHandler {
    /// Open a session for a new connection.
    ///
    /// Returns the handler and the connection's outbox, which already holds
    /// a `connectionSetup` frame with the current round state.
    pub async fn connect(context: Arc<GameContext>) -> (Self, mpsc::Receiver<Frame>) {
        Self::connect_with_id(context, Uuid::new_v4()).await
    }

    pub async fn connect_with_id(
        context: Arc<GameContext>,
        connection_id: ConnectionId,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let outbox = context.broadcaster.attach(connection_id).await;
        let state = context.round.send_connection_setup(&connection_id).await;
        log::debug!("Session {connection_id} opened in state {state}");
        (
            Self {
                connection_id,
                context,
            },
            outbox,
        )
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Dispatch one inbound event.
    pub async fn handle(&self, event: ClientEvent) {
        log::trace!("Session {} received {}", self.connection_id, event.name());
        match event {
            ClientEvent::InitializePlayer { player_id } => {
                self.initialize_player(&player_id).await;
            }
            ClientEvent::RequestGameStart => self.request_game_start().await,
            ClientEvent::RoundEnd => {
                self.context.round.report_round_end(&self.connection_id).await;
            }
            ClientEvent::PlayerMove(update) => {
                self.context
                    .relay
                    .on_position_update(&self.connection_id, update)
                    .await;
            }
        }
    }

    /// Bind this connection to a stored profile.
    ///
    /// Unknown ids are ignored. A known id registers the player, refreshes
    /// everybody's roster, echoes the identity back and counts as a start
    /// request. Returns whether the player was registered.
    async fn initialize_player(&self, player_id: &str) -> bool {
        if player_id.is_empty() {
            log::debug!("Session {} sent initializePlayer without an id", self.connection_id);
            return false;
        }

        let Some(identity) = self.context.store.get(player_id) else {
            log::debug!("Session {} claimed unknown player {player_id}", self.connection_id);
            return false;
        };

        {
            let mut registry = self.context.registry.write().await;
            registry.register(self.connection_id, identity.clone());
            let roster = registry.list_summaries();
            self.context
                .broadcaster
                .send_all(&ServerEvent::Players(roster))
                .await;
        }
        log::info!(
            "Player {} ({}) joined on {}",
            identity.name,
            identity.id,
            self.connection_id
        );

        self.context
            .broadcaster
            .send_to(&self.connection_id, &ServerEvent::PlayerUpdate(identity))
            .await;
        self.context.round.request_start(&self.connection_id).await;
        true
    }

    async fn request_game_start(&self) {
        if !self.context.registry.read().await.contains(&self.connection_id) {
            log::debug!("Ignoring start request from uninitialized {}", self.connection_id);
            return;
        }
        self.context.round.request_start(&self.connection_id).await;
    }

    /// Tear the session down after the transport closed.
    pub async fn disconnect(self) {
        let id = self.connection_id;
        self.context.broadcaster.detach(&id).await;

        {
            let mut registry = self.context.registry.write().await;
            if let Some(identity) = registry.unregister(&id) {
                log::info!("Player {} ({}) left", identity.name, identity.id);
                let roster = registry.list_summaries();
                self.context
                    .broadcaster
                    .send_all(&ServerEvent::Players(roster))
                    .await;
            }
        }

        self.context.round.on_player_departure().await;
        self.context.relay.on_disconnect(&id).await;
        log::debug!("Session {id} closed");
    }

    pub async fn round_state(&self) -> RoundState {
        self.context.round.state().await
    }
}
