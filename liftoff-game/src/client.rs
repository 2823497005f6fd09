//! WebSocket game client.
//!
//! A thin typed wrapper around one connection: outgoing [`ClientEvent`]s are
//! queued to a writer task, incoming frames are decoded into
//! [`ServerEvent`]s and delivered on a channel. Used by the integration
//! tests and handy for bots.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientEvent, PositionUpdate, ProtocolError, ServerEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The game client.
pub struct GameClient {
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to send frames to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<ServerEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<ServerEvent>,

    /// Server URL
    server_url: String,
}

impl GameClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        // Before the reader exists, so its Disconnected is never overwritten.
        *self.state.write().await = ConnectionState::Connected;

        // Writer task: forward outgoing channel to WebSocket, close when the
        // client drops its sender.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_writer.send(Message::Text(text.into())).await {
                    log::debug!("Writer stopped: {e}");
                    return;
                }
            }
            if let Err(e) = ws_writer.send(Message::Close(None)).await {
                log::debug!("Failed to send close frame: {e}");
            }
        });

        // Reader task: decode incoming frames into events.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Skipping undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
        });

        Ok(())
    }

    /// Send one event to the server.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), ProtocolError> {
        let encoded = event.encode()?;
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(encoded)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub async fn initialize_player(&self, player_id: impl Into<String>) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::InitializePlayer {
            player_id: player_id.into(),
        })
        .await
    }

    pub async fn request_game_start(&self) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::RequestGameStart).await
    }

    pub async fn round_end(&self) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::RoundEnd).await
    }

    pub async fn move_to(&self, x: f64, y: f64, animation: Option<&str>) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::PlayerMove(PositionUpdate {
            x,
            y,
            animation: animation.map(str::to_string),
        }))
        .await
    }

    /// Close the connection. Queued frames are flushed first.
    pub fn close(&mut self) {
        self.outgoing_tx = None;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = GameClient::new("ws://localhost:9090");
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let mut client = GameClient::new("ws://localhost:9090");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let client = GameClient::new("ws://localhost:9090");
        let result = client.request_game_start().await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = GameClient::new(format!("ws://127.0.0.1:{port}"));

        assert!(client.connect().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_close_after_peer_vanished() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);
        });

        let mut client = GameClient::new(format!("ws://127.0.0.1:{port}"));
        client.connect().await.unwrap();
        peer.await.unwrap();

        // The writer may find the socket gone; closing must still settle.
        client.close();
        let settled = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while client.connection_state().await != ConnectionState::Disconnected {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(settled.is_ok());
        assert!(client.request_game_start().await.is_err());
    }
}
