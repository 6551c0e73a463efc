use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crumble_core::record::GameRecord;
use crumble_core::room::{Role, RoomState};
use crumble_core::time::unix_now;

#[derive(Debug)]
pub enum PersistError {
    Backend(String),
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend(e) => write!(f, "persistence error: {e}"),
        }
    }
}

impl std::error::Error for PersistError {}

/// Match persistence: append finished-game records and bump cumulative
/// scores. Calls are fire-and-forget from the game plane — failures are
/// logged, never propagated into the event path. The in-memory backend
/// serves tests and single-node deployments; a database-backed variant
/// slots in beside it.
#[derive(Clone)]
pub enum MatchPersistence {
    Memory(MemoryPersistence),
    /// Drop records on the floor (logged at debug).
    Disabled,
}

impl MatchPersistence {
    pub fn in_memory() -> Self {
        Self::Memory(MemoryPersistence::new())
    }

    pub async fn save_game(&self, record: &GameRecord) -> Result<(), PersistError> {
        match self {
            Self::Memory(p) => p.save_game(record),
            Self::Disabled => {
                tracing::debug!(game_id = %record.game_id, "persistence disabled, dropping record");
                Ok(())
            },
        }
    }

    pub async fn increment_user_score(&self, user_id: &str, delta: i64) -> Result<(), PersistError> {
        match self {
            Self::Memory(p) => p.increment_user_score(user_id, delta),
            Self::Disabled => Ok(()),
        }
    }

    /// Records saved so far. Test accessor; the memory backend is the
    /// only one that can answer.
    pub fn saved_games(&self) -> Vec<GameRecord> {
        match self {
            Self::Memory(p) => p.games(),
            Self::Disabled => Vec::new(),
        }
    }

    pub fn total_score(&self, user_id: &str) -> i64 {
        match self {
            Self::Memory(p) => p.total_score(user_id),
            Self::Disabled => 0,
        }
    }
}

#[derive(Clone)]
pub struct MemoryPersistence {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    games: Vec<GameRecord>,
    totals: HashMap<String, i64>,
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn save_game(&self, record: &GameRecord) -> Result<(), PersistError> {
        let mut inner = self.inner.lock().expect("persistence lock");
        inner.games.push(record.clone());
        Ok(())
    }

    fn increment_user_score(&self, user_id: &str, delta: i64) -> Result<(), PersistError> {
        let mut inner = self.inner.lock().expect("persistence lock");
        *inner.totals.entry(user_id.to_string()).or_insert(0) += delta;
        Ok(())
    }

    fn games(&self) -> Vec<GameRecord> {
        self.inner.lock().expect("persistence lock").games.clone()
    }

    fn total_score(&self, user_id: &str) -> i64 {
        self.inner
            .lock()
            .expect("persistence lock")
            .totals
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }
}

/// Write both players' records and cumulative-score bumps for a finished
/// match. Only called for normal endings; quits and disconnects are never
/// persisted.
pub async fn record_match(persistence: &MatchPersistence, room: &RoomState) {
    let timestamp = unix_now();
    for role in [Role::P1, Role::P2] {
        let record = GameRecord::for_player(room, role, timestamp);
        if let Err(e) = persistence.save_game(&record).await {
            tracing::error!(
                game_id = %record.game_id,
                player_id = %record.player_id,
                error = %e,
                "failed to persist game record"
            );
        }
        if let Err(e) = persistence
            .increment_user_score(&record.player_id, record.score)
            .await
        {
            tracing::error!(
                player_id = %record.player_id,
                error = %e,
                "failed to update cumulative score"
            );
        }
    }
}
