use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::QueueEntry;
use crate::message::GameSnapshot;

/// Winner value stored for a drawn match.
pub const DRAW: &str = "draw";

/// Golden cookie spawn coordinates are percentages, kept away from the
/// play-area edges.
pub const SPAWN_COORD_MIN: f64 = 5.0;
pub const SPAWN_COORD_MAX: f64 = 95.0;

/// Which seat a participant occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    P1,
    P2,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoldenCookie {
    pub x: f64,
    pub y: f64,
}

/// Room lifecycle. Collapsing the started/ended/golden flags into one
/// enum makes "winner is set iff the room ended" hold by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RoomPhase {
    Countdown,
    Running {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        golden: Option<GoldenCookie>,
    },
    Ended {
        winner: String,
    },
}

/// Authoritative match state, stored as a JSON value in the shared store
/// and mutated only through optimistic transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub room_id: String,
    pub player1_id: String,
    pub player1_name: String,
    pub player1_avatar: String,
    pub player2_id: String,
    pub player2_name: String,
    pub player2_avatar: String,
    pub p1_score: i64,
    pub p2_score: i64,
    pub time_remaining: i64,
    /// user_id -> unix seconds until which that player's clicks count double.
    #[serde(default)]
    pub double_click_expiry: HashMap<String, i64>,
    pub phase: RoomPhase,
    pub timer_replica_id: String,
}

impl RoomState {
    pub fn new(
        room_id: &str,
        player1: &QueueEntry,
        player2: &QueueEntry,
        duration_secs: i64,
        timer_replica_id: &str,
    ) -> Self {
        Self {
            room_id: room_id.to_string(),
            player1_id: player1.user_id.clone(),
            player1_name: player1.name.clone(),
            player1_avatar: player1.avatar.clone(),
            player2_id: player2.user_id.clone(),
            player2_name: player2.name.clone(),
            player2_avatar: player2.avatar.clone(),
            p1_score: 0,
            p2_score: 0,
            time_remaining: duration_secs,
            double_click_expiry: HashMap::new(),
            phase: RoomPhase::Countdown,
            timer_replica_id: timer_replica_id.to_string(),
        }
    }

    pub fn ended(&self) -> bool {
        matches!(self.phase, RoomPhase::Ended { .. })
    }

    pub fn winner(&self) -> Option<&str> {
        match &self.phase {
            RoomPhase::Ended { winner } => Some(winner.as_str()),
            _ => None,
        }
    }

    pub fn golden(&self) -> Option<GoldenCookie> {
        match &self.phase {
            RoomPhase::Running { golden } => *golden,
            _ => None,
        }
    }

    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        if user_id == self.player1_id {
            Some(Role::P1)
        } else if user_id == self.player2_id {
            Some(Role::P2)
        } else {
            None
        }
    }

    pub fn opponent_of(&self, user_id: &str) -> Option<&str> {
        match self.role_of(user_id)? {
            Role::P1 => Some(&self.player2_id),
            Role::P2 => Some(&self.player1_id),
        }
    }

    /// Points a click is worth right now: 2 inside the player's
    /// double-click window, 1 otherwise. The boundary instant counts
    /// single (`now == expiry` -> 1).
    pub fn click_points(&self, user_id: &str, now: i64) -> i64 {
        match self.double_click_expiry.get(user_id) {
            Some(&expiry) if now < expiry => 2,
            _ => 1,
        }
    }

    /// Credit `points` to the given player. Returns false if the user is
    /// not a participant.
    pub fn add_points(&mut self, user_id: &str, points: i64) -> bool {
        match self.role_of(user_id) {
            Some(Role::P1) => {
                self.p1_score += points;
                true
            },
            Some(Role::P2) => {
                self.p2_score += points;
                true
            },
            None => false,
        }
    }

    /// Countdown -> Running. Returns false from any other phase.
    pub fn start_running(&mut self) -> bool {
        match self.phase {
            RoomPhase::Countdown => {
                self.phase = RoomPhase::Running { golden: None };
                true
            },
            _ => false,
        }
    }

    /// Place (or move) the golden cookie. Only valid while running; a
    /// respawn before a claim replaces the previous position.
    pub fn spawn_golden(&mut self, x: f64, y: f64) -> bool {
        match self.phase {
            RoomPhase::Running { .. } => {
                self.phase = RoomPhase::Running {
                    golden: Some(GoldenCookie { x, y }),
                };
                true
            },
            _ => false,
        }
    }

    /// Single-winner claim transition. Returns false (no-op) when there is
    /// no active cookie or the user is not a participant.
    pub fn claim_golden(&mut self, user_id: &str, now: i64, bonus_secs: i64) -> bool {
        if self.role_of(user_id).is_none() {
            return false;
        }
        match self.phase {
            RoomPhase::Running { golden: Some(_) } => {
                self.phase = RoomPhase::Running { golden: None };
                self.double_click_expiry
                    .insert(user_id.to_string(), now + bonus_secs);
                true
            },
            _ => false,
        }
    }

    /// Winner by score, `"draw"` on a tie.
    pub fn winner_from_scores(&self) -> String {
        if self.p1_score > self.p2_score {
            self.player1_id.clone()
        } else if self.p2_score > self.p1_score {
            self.player2_id.clone()
        } else {
            DRAW.to_string()
        }
    }

    /// Transition to Ended with the given winner. Returns false if the
    /// room already ended (first writer wins).
    pub fn end(&mut self, winner: String) -> bool {
        if self.ended() {
            return false;
        }
        self.phase = RoomPhase::Ended { winner };
        true
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            time_remaining: self.time_remaining,
            p1_score: self.p1_score,
            p2_score: self.p2_score,
            p1_name: self.player1_name.clone(),
            p2_name: self.player2_name.clone(),
        }
    }
}
