use serde::{Deserialize, Serialize};

use crate::message::{ClaimUpdate, GameOverPayload, GameSnapshot};

/// A player advertisement in the shared matchmaking queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub user_id: String,
    pub name: String,
    pub avatar: String,
    /// Replica holding this player's socket at enqueue time.
    pub replica_id: String,
    /// Unix seconds; entries older than the queue TTL are stale.
    pub joined_at: i64,
}

impl QueueEntry {
    pub fn is_stale(&self, now: i64, ttl_secs: i64) -> bool {
        now - self.joined_at >= ttl_secs
    }
}

/// Published once per match on the match channel. Embeds both queue
/// entries so every replica can greet its local participant without a
/// store read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchNotification {
    pub player1: QueueEntry,
    pub player2: QueueEntry,
    pub room_id: String,
    pub timer_replica_id: String,
}

/// A game event broadcast to every replica over the event channel.
/// Replicas translate these into socket frames for local participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    pub room_id: String,
    /// Originating player, empty for timer-driven events.
    #[serde(default)]
    pub player_id: String,
    #[serde(flatten)]
    pub kind: GameEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameEventKind {
    StateUpdate(GameSnapshot),
    GoldenSpawn { x: f64, y: f64 },
    GoldenClaim(ClaimUpdate),
    Click { count: i64 },
    GameEnd(GameOverPayload),
    PlayerQuit(GameOverPayload),
}
