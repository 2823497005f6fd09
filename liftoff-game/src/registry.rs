//! Roster of initialized connections.
//!
//! A connection appears here only after it declared an identity that
//! resolved against the profile store. Absence means "not yet initialized".

use indexmap::IndexMap;

use crate::protocol::{ConnectionId, PlayerIdentity, PlayerSummary};

/// Maps live connections to the players they play as, in registration order.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    players: IndexMap<ConnectionId, PlayerIdentity>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the identity of a connection.
    ///
    /// Re-registering keeps the connection's original roster position.
    pub fn register(&mut self, connection_id: ConnectionId, identity: PlayerIdentity) {
        self.players.insert(connection_id, identity);
    }

    /// Remove a connection, returning the identity it held.
    pub fn unregister(&mut self, connection_id: &ConnectionId) -> Option<PlayerIdentity> {
        self.players.shift_remove(connection_id)
    }

    pub fn count(&self) -> usize {
        self.players.len()
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.players.contains_key(connection_id)
    }

    /// `{id, name}` for every registered player, oldest first.
    pub fn list_summaries(&self) -> Vec<PlayerSummary> {
        self.players.values().map(PlayerIdentity::summary).collect()
    }
}
