use serde::{Deserialize, Serialize};

use crate::room::{Role, RoomState};

/// Why a match ended. Only `Normal` endings are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Normal,
    OpponentDisconnected,
    Quit,
}

/// One player's view of a finished match, written to match persistence.
/// Names and avatars are denormalized so history rendering needs no join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub game_id: String,
    pub player_id: String,
    pub opponent: String,
    pub timestamp: i64,
    pub score: i64,
    pub opponent_score: i64,
    pub won: bool,
    pub winner_id: String,
    pub reason: EndReason,
    pub player_name: String,
    pub player_avatar: String,
    pub opponent_name: String,
    pub opponent_avatar: String,
}

impl GameRecord {
    /// Build the record for one seat of an ended room.
    pub fn for_player(room: &RoomState, role: Role, timestamp: i64) -> Self {
        let winner_id = room.winner().unwrap_or_default().to_string();
        let (player_id, opponent, score, opponent_score, player_name, player_avatar, opponent_name, opponent_avatar) =
            match role {
                Role::P1 => (
                    &room.player1_id,
                    &room.player2_id,
                    room.p1_score,
                    room.p2_score,
                    &room.player1_name,
                    &room.player1_avatar,
                    &room.player2_name,
                    &room.player2_avatar,
                ),
                Role::P2 => (
                    &room.player2_id,
                    &room.player1_id,
                    room.p2_score,
                    room.p1_score,
                    &room.player2_name,
                    &room.player2_avatar,
                    &room.player1_name,
                    &room.player1_avatar,
                ),
            };
        Self {
            game_id: room.room_id.clone(),
            player_id: player_id.clone(),
            opponent: opponent.clone(),
            timestamp,
            score,
            opponent_score,
            won: winner_id == *player_id,
            winner_id,
            reason: EndReason::Normal,
            player_name: player_name.clone(),
            player_avatar: player_avatar.clone(),
            opponent_name: opponent_name.clone(),
            opponent_avatar: opponent_avatar.clone(),
        }
    }
}
