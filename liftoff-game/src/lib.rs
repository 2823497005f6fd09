//! # liftoff-game: Multiplayer crash-game server core
//!
//! A server-authoritative round loop shared by every connected client, plus
//! a pass-through relay for free-roam avatar positions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────┐
//! │ GameClient  │ ◄─────────────────► │ GameServer   │
//! │ (per user)  │   JSON envelopes    │ (central)    │
//! └─────────────┘                     └──────┬───────┘
//!                                            │ SessionHandler per socket
//!                          ┌─────────────────┼─────────────────┐
//!                          ▼                 ▼                 ▼
//!                  ConnectionRegistry  RoundStateMachine  PositionRelay
//!                          │                 │                 │
//!                          └────────► Broadcaster ◄────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: `{event, data}` JSON envelope and event types
//! - [`registry`]: connections bound to player identities
//! - [`broadcast`]: per-connection outboxes and fan-out
//! - [`round`]: waiting / countdown / playing / round-end lifecycle
//! - [`relay`]: avatar position pass-through
//! - [`session`]: per-connection event dispatch
//! - [`store`]: player profile storage
//! - [`server`]: WebSocket game server
//! - [`client`]: WebSocket game client

pub mod protocol;
pub mod registry;
pub mod broadcast;
pub mod round;
pub mod relay;
pub mod session;
pub mod store;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{
    ClientEvent, ConnectionId, PlayerIdentity, PlayerSummary, PositionUpdate, ProtocolError,
    RoundState, ServerEvent,
};
pub use registry::ConnectionRegistry;
pub use broadcast::{BroadcastStats, Broadcaster, Frame};
pub use round::{RoundConfig, RoundStateMachine, StartOutcome, NOT_ENOUGH_PLAYERS};
pub use relay::PositionRelay;
pub use session::{GameContext, SessionHandler};
pub use store::{
    JsonFileProfileStore, MemoryProfileStore, ProfileStore, StoreError, STARTING_CREDITS,
};
pub use server::{GameServer, ServerConfig, ServerStats};
pub use client::{ConnectionState, GameClient};
