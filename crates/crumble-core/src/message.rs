use serde::{Deserialize, Serialize};

use crate::record::EndReason;
use crate::room::Role;

/// Maximum size in bytes of a single inbound text frame.
pub const MAX_INBOUND_FRAME: usize = 512;

#[derive(Debug)]
pub enum ProtocolError {
    FrameTooLarge(usize),
    Decode(String),
    Encode(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FrameTooLarge(size) => {
                write!(f, "frame too large: {size} bytes (max {MAX_INBOUND_FRAME})")
            },
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Messages a client may send. Wire form is a self-describing JSON
/// envelope: `{"type": "JOIN_QUEUE", "payload": {}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    JoinQueue {},
    Click {},
    CookieClick {},
    QuitGame {},
}

/// Messages the server sends. Same envelope shape as [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    GameStart(GameStartPayload),
    Update(UpdatePayload),
    CookieSpawn(CookieSpawnPayload),
    OpponentClick(OpponentClickPayload),
    GameOver(GameOverPayload),
}

impl ServerMessage {
    /// Reliable frames must not be silently dropped on a full send buffer;
    /// losing one means the connection is considered dead. Everything else
    /// is a periodic or decorative update the client can survive missing.
    pub fn is_reliable(&self) -> bool {
        matches!(self, Self::GameStart(_) | Self::GameOver(_))
    }
}

/// Sent to each participant when a match is made. Carries the initial
/// snapshot fields so the client can render the countdown screen without
/// waiting for the first UPDATE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartPayload {
    pub opponent: String,
    pub role: Role,
    pub room_id: String,
    pub time_remaining: i64,
    pub p1_score: i64,
    pub p2_score: i64,
    pub p1_name: String,
    pub p2_name: String,
    pub p1_picture: String,
    pub p2_picture: String,
}

/// UPDATE carries either the full authoritative snapshot (timer tick) or
/// a claim delta after a golden cookie is won.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpdatePayload {
    Claim(ClaimUpdate),
    Snapshot(GameSnapshot),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub time_remaining: i64,
    pub p1_score: i64,
    pub p2_score: i64,
    pub p1_name: String,
    pub p2_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimUpdate {
    pub golden_cookie_claimed_by: String,
    pub p1_score: i64,
    pub p2_score: i64,
}

/// Golden cookie position, percent of the play area on each axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieSpawnPayload {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpponentClickPayload {
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverPayload {
    pub winner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndReason>,
}

/// Encode a server message as a JSON text frame.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode an inbound text frame into a client message. Enforces the
/// inbound size cap before touching the parser.
pub fn decode_client_message(frame: &str) -> Result<ClientMessage, ProtocolError> {
    if frame.len() > MAX_INBOUND_FRAME {
        return Err(ProtocolError::FrameTooLarge(frame.len()));
    }
    serde_json::from_str(frame).map_err(|e| ProtocolError::Decode(e.to_string()))
}
