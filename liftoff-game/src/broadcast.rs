//! Fan-out of server events to live connections.
//!
//! Every attached connection owns a bounded outbox drained by its socket
//! writer. An event is serialized once per call and the encoded frame is
//! shared by all recipients. Delivery is at-most-once and never retried.
//!
//! A full outbox drops relayed positions but not round events: a connection
//! too slow to take a round event is evicted instead. Its outbox closes once
//! drained, the socket task ends, and the client resyncs on reconnect through
//! `connectionSetup`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::sync::mpsc::error::TrySendError;

use crate::protocol::{ConnectionId, ServerEvent};

/// Encoded text frame shared between recipients.
pub type Frame = Arc<str>;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub connections_evicted: u64,
    pub active_connections: usize,
}

/// Lock-free counters, read via [`Broadcaster::stats`].
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    connections_evicted: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            connections_evicted: AtomicU64::new(0),
        }
    }
}

/// Result of queueing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Queued,
    Dropped,
    /// Outbox full with a frame that must not be lost.
    Lagging,
}

/// Outboxes of all live connections.
pub struct Broadcaster {
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<Frame>>>,
    /// Frames buffered per connection before it counts as lagging
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            capacity,
            atomic_stats: AtomicBroadcastStats::new(),
        }
    }

    /// Attach a connection and return the receiving end of its outbox.
    ///
    /// Attaching an id twice replaces the earlier outbox.
    pub async fn attach(&self, connection_id: ConnectionId) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.connections.write().await.insert(connection_id, tx);
        rx
    }

    /// Detach a connection. Returns false if it was not attached.
    pub async fn detach(&self, connection_id: &ConnectionId) -> bool {
        self.connections.write().await.remove(connection_id).is_some()
    }

    /// Deliver to exactly one connection. Returns whether the frame was queued.
    pub async fn send_to(&self, connection_id: &ConnectionId, event: &ServerEvent) -> bool {
        let Some(frame) = self.encode(event) else {
            return false;
        };
        let delivery = {
            let connections = self.connections.read().await;
            match connections.get(connection_id) {
                Some(tx) => self.deliver(connection_id, tx, frame, event),
                None => {
                    log::debug!("Dropping {} for vanished connection {connection_id}", event.name());
                    Delivery::Dropped
                }
            }
        };
        if delivery == Delivery::Lagging {
            self.evict(&[*connection_id]).await;
        }
        delivery == Delivery::Queued
    }

    /// Deliver to every live connection. Returns the number of recipients.
    pub async fn send_all(&self, event: &ServerEvent) -> usize {
        self.fan_out(event, |_| true).await
    }

    /// Deliver to every live connection except `excluded`.
    pub async fn send_all_except(&self, excluded: &ConnectionId, event: &ServerEvent) -> usize {
        self.fan_out(event, |id| id != excluded).await
    }

    async fn fan_out(&self, event: &ServerEvent, filter: impl Fn(&ConnectionId) -> bool) -> usize {
        let Some(frame) = self.encode(event) else {
            return 0;
        };
        let mut recipients = 0;
        let mut lagging = Vec::new();
        {
            let connections = self.connections.read().await;
            for (id, tx) in connections.iter().filter(|(id, _)| filter(id)) {
                match self.deliver(id, tx, frame.clone(), event) {
                    Delivery::Queued => recipients += 1,
                    Delivery::Dropped => {}
                    Delivery::Lagging => lagging.push(*id),
                }
            }
        }
        if !lagging.is_empty() {
            self.evict(&lagging).await;
        }
        log::trace!("Broadcast {} to {recipients} connections", event.name());
        recipients
    }

    fn encode(&self, event: &ServerEvent) -> Option<Frame> {
        match event.encode() {
            Ok(text) => Some(Frame::from(text)),
            Err(e) => {
                log::warn!("Failed to encode {}: {e}", event.name());
                None
            }
        }
    }

    fn deliver(
        &self,
        connection_id: &ConnectionId,
        tx: &mpsc::Sender<Frame>,
        frame: Frame,
        event: &ServerEvent,
    ) -> Delivery {
        match tx.try_send(frame) {
            Ok(()) => {
                self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                Delivery::Queued
            }
            Err(TrySendError::Full(_)) => {
                self.atomic_stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                if event.is_lossy() {
                    log::debug!("Outbox full for connection {connection_id}, {} dropped", event.name());
                    Delivery::Dropped
                } else {
                    log::warn!("Outbox full for connection {connection_id} on {}, evicting", event.name());
                    Delivery::Lagging
                }
            }
            Err(TrySendError::Closed(_)) => {
                self.atomic_stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Connection {connection_id} closed, frame dropped");
                Delivery::Dropped
            }
        }
    }

    /// Drop the outboxes of lagging connections.
    async fn evict(&self, ids: &[ConnectionId]) {
        let mut connections = self.connections.write().await;
        for id in ids {
            if connections.remove(id).is_some() {
                self.atomic_stats.connections_evicted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_attached(&self, connection_id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(connection_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            connections_evicted: self.atomic_stats.connections_evicted.load(Ordering::Relaxed),
            active_connections: self.connections.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
