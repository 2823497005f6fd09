//! JSON event protocol spoken over WebSocket text frames.
//!
//! Wire format:
//! ```text
//! { "event": "<camelCaseName>", "data": <payload> }
//! ```
//!
//! Inbound frames are decoded through a name-keyed table into
//! [`ClientEvent`]; `data` may be omitted for events that carry nothing.
//! Outbound frames are [`ServerEvent`] values serialized with an adjacent
//! `event`/`data` tag, so every payload shape is checked at compile time.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Stable identifier of one live transport connection.
pub type ConnectionId = Uuid;

/// Inbound event names.
pub const INITIALIZE_PLAYER: &str = "initializePlayer";
pub const REQUEST_GAME_START: &str = "requestGameStart";
pub const ROUND_END: &str = "roundEnd";
pub const PLAYER_MOVE: &str = "playerMove";

/// Lifecycle phase of the shared round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Waiting,
    Countdown,
    Playing,
    RoundEnd,
}

impl RoundState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Countdown => "countdown",
            Self::Playing => "playing",
            Self::RoundEnd => "round_end",
        }
    }
}

impl std::fmt::Display for RoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored player profile.
///
/// `credits` is carried for display only; nothing in the game core writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub id: String,
    pub name: String,
    pub credits: i64,
    /// Creation time in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
}

impl PlayerIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, credits: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            credits,
            created: None,
        }
    }

    pub fn summary(&self) -> PlayerSummary {
        PlayerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Roster entry broadcast in `players` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub id: String,
    pub name: String,
}

/// Free-roam position report from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<String>,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Declare which stored profile this connection plays as.
    InitializePlayer { player_id: String },
    RequestGameStart,
    /// The local rocket crossed the crash distance.
    RoundEnd,
    PlayerMove(PositionUpdate),
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializePayload {
    #[serde(default)]
    player_id: Option<String>,
}

impl ClientEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitializePlayer { .. } => INITIALIZE_PLAYER,
            Self::RequestGameStart => REQUEST_GAME_START,
            Self::RoundEnd => ROUND_END,
            Self::PlayerMove(_) => PLAYER_MOVE,
        }
    }

    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;

        match envelope.event.as_str() {
            INITIALIZE_PLAYER => {
                let payload: InitializePayload = payload(envelope.data)?;
                Ok(Self::InitializePlayer {
                    player_id: payload.player_id.unwrap_or_default(),
                })
            }
            REQUEST_GAME_START => Ok(Self::RequestGameStart),
            ROUND_END => Ok(Self::RoundEnd),
            PLAYER_MOVE => Ok(Self::PlayerMove(payload(envelope.data)?)),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }

    /// Encode to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let data = match self {
            Self::InitializePlayer { player_id } => serde_json::to_value(InitializePayload {
                player_id: Some(player_id.clone()),
            }),
            Self::RequestGameStart | Self::RoundEnd => Ok(serde_json::json!({})),
            Self::PlayerMove(position) => serde_json::to_value(position),
        }
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;

        let envelope = Envelope {
            event: self.name().to_string(),
            data,
        };
        serde_json::to_string(&envelope).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }
}

/// Absent `data` decodes as an empty object so payload defaults apply.
fn payload<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, ProtocolError> {
    let data = if data.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Current round state, sent once right after connect.
    ConnectionSetup { state: RoundState },
    /// Current roster, in registration order.
    Players(Vec<PlayerSummary>),
    /// Echo of the identity a connection initialized as.
    PlayerUpdate(PlayerIdentity),
    WaitingForPlayers { count: usize },
    GameInProgress { state: RoundState },
    Countdown { n: u32 },
    #[serde(rename_all = "camelCase")]
    GameStart { crash_point: u32 },
    #[serde(rename_all = "camelCase")]
    RoundWait { seconds_left: u32 },
    GameCancelled { reason: String },
    PlayerMoved {
        id: ConnectionId,
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        animation: Option<String>,
    },
    PlayerLeft { id: ConnectionId },
}

impl ServerEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionSetup { .. } => "connectionSetup",
            Self::Players(_) => "players",
            Self::PlayerUpdate(_) => "playerUpdate",
            Self::WaitingForPlayers { .. } => "waitingForPlayers",
            Self::GameInProgress { .. } => "gameInProgress",
            Self::Countdown { .. } => "countdown",
            Self::GameStart { .. } => "gameStart",
            Self::RoundWait { .. } => "roundWait",
            Self::GameCancelled { .. } => "gameCancelled",
            Self::PlayerMoved { .. } => "playerMoved",
            Self::PlayerLeft { .. } => "playerLeft",
        }
    }

    /// Whether a client may miss this event without losing sync.
    ///
    /// Only relayed positions qualify; the next move supersedes them.
    pub fn is_lossy(&self) -> bool {
        matches!(self, Self::PlayerMoved { .. })
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
    #[error("Connection closed")]
    ConnectionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn wire(event: &ServerEvent) -> Value {
        serde_json::from_str(&event.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_decode_initialize_player() {
        let event = ClientEvent::decode(r#"{"event":"initializePlayer","data":{"playerId":"p1"}}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::InitializePlayer {
                player_id: "p1".into()
            }
        );
    }

    #[test]
    fn test_decode_initialize_without_id() {
        let event = ClientEvent::decode(r#"{"event":"initializePlayer","data":{}}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::InitializePlayer {
                player_id: String::new()
            }
        );
    }

    #[test]
    fn test_decode_events_without_data() {
        assert_eq!(
            ClientEvent::decode(r#"{"event":"requestGameStart"}"#).unwrap(),
            ClientEvent::RequestGameStart
        );
        assert_eq!(
            ClientEvent::decode(r#"{"event":"roundEnd","data":{}}"#).unwrap(),
            ClientEvent::RoundEnd
        );
    }

    #[test]
    fn test_decode_player_move() {
        let event =
            ClientEvent::decode(r#"{"event":"playerMove","data":{"x":12.5,"y":-3,"animation":"walk"}}"#)
                .unwrap();
        match event {
            ClientEvent::PlayerMove(position) => {
                assert_eq!(position.x, 12.5);
                assert_eq!(position.y, -3.0);
                assert_eq!(position.animation.as_deref(), Some("walk"));
            }
            other => panic!("Expected PlayerMove, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_player_move_missing_coordinates() {
        let result = ClientEvent::decode(r#"{"event":"playerMove","data":{"x":1}}"#);
        assert!(matches!(result, Err(ProtocolError::DeserializationError(_))));
    }

    #[test]
    fn test_decode_unknown_event() {
        let result = ClientEvent::decode(r#"{"event":"placeBet","data":{"amount":5}}"#);
        match result {
            Err(ProtocolError::UnknownEvent(name)) => assert_eq!(name, "placeBet"),
            other => panic!("Expected UnknownEvent, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(ClientEvent::decode("not json").is_err());
        assert!(ClientEvent::decode(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn test_client_encode_uses_wire_names() {
        let text = ClientEvent::InitializePlayer {
            player_id: "abc".into(),
        }
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"event": "initializePlayer", "data": {"playerId": "abc"}}));

        let text = ClientEvent::RequestGameStart.encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"event": "requestGameStart", "data": {}}));
    }

    #[test]
    fn test_round_state_wire_names() {
        let value = wire(&ServerEvent::ConnectionSetup {
            state: RoundState::RoundEnd,
        });
        assert_eq!(value, json!({"event": "connectionSetup", "data": {"state": "round_end"}}));
        assert_eq!(RoundState::Countdown.to_string(), "countdown");
    }

    #[test]
    fn test_server_event_payload_shapes() {
        assert_eq!(
            wire(&ServerEvent::GameStart { crash_point: 777 }),
            json!({"event": "gameStart", "data": {"crashPoint": 777}})
        );
        assert_eq!(
            wire(&ServerEvent::RoundWait { seconds_left: 20 }),
            json!({"event": "roundWait", "data": {"secondsLeft": 20}})
        );
        assert_eq!(
            wire(&ServerEvent::Countdown { n: 5 }),
            json!({"event": "countdown", "data": {"n": 5}})
        );
        assert_eq!(
            wire(&ServerEvent::WaitingForPlayers { count: 0 }),
            json!({"event": "waitingForPlayers", "data": {"count": 0}})
        );
        assert_eq!(
            wire(&ServerEvent::Players(vec![PlayerSummary {
                id: "p1".into(),
                name: "Ada".into()
            }])),
            json!({"event": "players", "data": [{"id": "p1", "name": "Ada"}]})
        );
    }

    #[test]
    fn test_player_moved_omits_missing_animation() {
        let id = Uuid::new_v4();
        let value = wire(&ServerEvent::PlayerMoved {
            id,
            x: 1.0,
            y: 2.0,
            animation: None,
        });
        assert_eq!(
            value,
            json!({"event": "playerMoved", "data": {"id": id.to_string(), "x": 1.0, "y": 2.0}})
        );
    }

    #[test]
    fn test_server_event_name_matches_tag() {
        let events = [
            ServerEvent::GameInProgress {
                state: RoundState::Playing,
            },
            ServerEvent::GameCancelled {
                reason: "Not enough players".into(),
            },
            ServerEvent::PlayerLeft { id: Uuid::new_v4() },
            ServerEvent::PlayerUpdate(PlayerIdentity::new("p1", "Ada", 10_000)),
        ];
        for event in &events {
            assert_eq!(wire(event)["event"], event.name());
        }
    }

    #[test]
    fn test_server_event_decode() {
        let decoded = ServerEvent::decode(r#"{"event":"gameStart","data":{"crashPoint":640}}"#).unwrap();
        assert_eq!(decoded, ServerEvent::GameStart { crash_point: 640 });
    }

    #[test]
    fn test_identity_created_is_optional() {
        let identity: PlayerIdentity =
            serde_json::from_str(r#"{"id":"p1","name":"Ada","credits":10000}"#).unwrap();
        assert_eq!(identity.created, None);
        assert_eq!(identity.summary().name, "Ada");
    }

    #[test]
    fn test_only_positions_are_lossy() {
        let moved = ServerEvent::PlayerMoved {
            id: Uuid::nil(),
            x: 1.0,
            y: 2.0,
            animation: None,
        };
        assert!(moved.is_lossy());
        assert!(!ServerEvent::GameStart { crash_point: 700 }.is_lossy());
        assert!(!ServerEvent::Countdown { n: 1 }.is_lossy());
        assert!(!ServerEvent::PlayerLeft { id: Uuid::nil() }.is_lossy());
    }
}
