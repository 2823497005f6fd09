//! Free-roam position relay.
//!
//! Pass-through only: positions are tagged with the sender's connection id
//! and forwarded to everybody else. Nothing is stored or validated; clamping
//! is the renderer's business.

use std::sync::Arc;

use crate::broadcast::Broadcaster;
use crate::protocol::{ConnectionId, PositionUpdate, ServerEvent};

#[derive(Clone)]
pub struct PositionRelay {
    broadcaster: Arc<Broadcaster>,
}

impl PositionRelay {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self { broadcaster }
    }

    /// Forward a position to every other live connection.
    pub async fn on_position_update(&self, sender: &ConnectionId, update: PositionUpdate) -> usize {
        log::trace!("Relaying position of {sender}: ({}, {})", update.x, update.y);
        let event = ServerEvent::PlayerMoved {
            id: *sender,
            x: update.x,
            y: update.y,
            animation: update.animation,
        };
        self.broadcaster.send_all_except(sender, &event).await
    }

    /// Announce that a connection left.
    pub async fn on_disconnect(&self, connection_id: &ConnectionId) -> usize {
        self.broadcaster
            .send_all_except(connection_id, &ServerEvent::PlayerLeft { id: *connection_id })
            .await
    }
}
