use crumble_core::event::{GameEvent, GameEventKind};
use crumble_core::message::{ClaimUpdate, GameOverPayload};
use crumble_core::record::EndReason;
use crumble_core::room::RoomState;
use crumble_core::time::unix_now;

use crate::state::AppState;
use crate::store::{StoreError, TransactOutcome, TransactStep, keys};

/// Run an optimistic transaction against a room's stored state. The
/// closure mutates the decoded state and returns whether to commit.
/// Returns the committed state, or None when the room is missing or the
/// closure declined.
pub(crate) async fn transact_room<F>(
    state: &AppState,
    room_id: &str,
    mut mutate: F,
) -> Result<Option<RoomState>, StoreError>
where
    F: FnMut(&mut RoomState) -> bool,
{
    let key = keys::room(room_id);
    let ttl = state.config.game.room_ttl();
    let outcome = state
        .store
        .watch_transact(&key, ttl, |current| {
            let Some(raw) = current else {
                return TransactStep::Abort;
            };
            let mut room = match serde_json::from_str::<RoomState>(raw) {
                Ok(room) => room,
                Err(e) => {
                    tracing::warn!(room_id = %room_id, error = %e, "undecodable room state");
                    return TransactStep::Abort;
                },
            };
            if !mutate(&mut room) {
                return TransactStep::Abort;
            }
            match serde_json::to_string(&room) {
                Ok(raw) => TransactStep::Write(raw),
                Err(e) => {
                    tracing::error!(room_id = %room_id, error = %e, "room state failed to serialize");
                    TransactStep::Abort
                },
            }
        })
        .await?;

    match outcome {
        TransactOutcome::Committed(raw) => Ok(serde_json::from_str(&raw).ok()),
        TransactOutcome::Aborted => Ok(None),
    }
}

/// Publish a game event on the shared bus. Failures are logged; the event
/// path never blocks on them.
pub(crate) async fn publish_event(state: &AppState, event: &GameEvent) {
    let payload = match serde_json::to_string(event) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "game event failed to serialize");
            return;
        },
    };
    if let Err(e) = state.store.publish(keys::EVENT_CHANNEL, &payload).await {
        tracing::warn!(room_id = %event.room_id, error = %e, "failed to publish game event");
    }
}

/// Delete the room's stored state after the post-end grace period.
pub(crate) fn schedule_room_cleanup(state: AppState, room_id: String) {
    tokio::spawn(async move {
        tokio::time::sleep(state.config.game.cleanup_delay()).await;
        if let Err(e) = state.store.kv_delete(&keys::room(&room_id)).await {
            tracing::debug!(room_id = %room_id, error = %e, "room cleanup failed");
        }
    });
}

/// CLICK: credit 1 point (2 inside the clicker's double-click window),
/// then tell the other replicas so the opponent sees the hit. Served by
/// whichever replica holds the clicking player's socket.
pub async fn handle_click(state: &AppState, user_id: &str) {
    let Some(room_id) = state.registry.room_of(user_id) else {
        return;
    };
    let now = unix_now();
    let mut points = 1;
    let result = transact_room(state, &room_id, |room| {
        if room.ended() {
            return false;
        }
        points = room.click_points(user_id, now);
        room.add_points(user_id, points)
    })
    .await;

    match result {
        Ok(Some(_)) => {
            publish_event(
                state,
                &GameEvent {
                    room_id,
                    player_id: user_id.to_string(),
                    kind: GameEventKind::Click { count: points },
                },
            )
            .await;
        },
        Ok(None) => {},
        Err(e) => {
            tracing::warn!(user_id, room_id = %room_id, error = %e, "click transaction failed");
        },
    }
}

/// COOKIE_CLICK: single-winner compare-and-claim. The losing racer's
/// transaction observes no active cookie and publishes nothing.
pub async fn handle_cookie_click(state: &AppState, user_id: &str) {
    let Some(room_id) = state.registry.room_of(user_id) else {
        return;
    };
    let now = unix_now();
    let bonus_secs = state.config.game.bonus_duration_secs;
    let result = transact_room(state, &room_id, |room| {
        room.claim_golden(user_id, now, bonus_secs)
    })
    .await;

    match result {
        Ok(Some(room)) => {
            publish_event(
                state,
                &GameEvent {
                    room_id,
                    player_id: user_id.to_string(),
                    kind: GameEventKind::GoldenClaim(ClaimUpdate {
                        golden_cookie_claimed_by: user_id.to_string(),
                        p1_score: room.p1_score,
                        p2_score: room.p2_score,
                    }),
                },
            )
            .await;
        },
        Ok(None) => {
            tracing::debug!(user_id, room_id = %room_id, "cookie claim lost the race");
        },
        Err(e) => {
            tracing::warn!(user_id, room_id = %room_id, error = %e, "claim transaction failed");
        },
    }
}

/// QUIT_GAME: resignation, opponent wins. Not persisted.
pub async fn handle_quit(state: &AppState, user_id: &str) {
    let Some(room_id) = state.registry.room_of(user_id) else {
        return;
    };
    end_abnormal(state, &room_id, user_id, EndReason::Quit).await;
}

/// A participant's socket went away mid-match: opponent wins, nothing is
/// persisted.
pub async fn handle_disconnect(state: &AppState, user_id: &str, room_id: &str) {
    end_abnormal(state, room_id, user_id, EndReason::OpponentDisconnected).await;
}

/// Shared quit/disconnect path: transition to Ended naming the leaver's
/// opponent as winner, announce it, and schedule the state for deletion.
async fn end_abnormal(state: &AppState, room_id: &str, leaver_id: &str, reason: EndReason) {
    let result = transact_room(state, room_id, |room| {
        if room.ended() {
            return false;
        }
        let Some(opponent) = room.opponent_of(leaver_id).map(str::to_string) else {
            return false;
        };
        room.end(opponent)
    })
    .await;

    match result {
        Ok(Some(room)) => {
            let winner = room.winner().unwrap_or_default().to_string();
            tracing::info!(
                room_id = %room_id,
                leaver = leaver_id,
                winner = %winner,
                ?reason,
                "match ended early"
            );
            publish_event(
                state,
                &GameEvent {
                    room_id: room_id.to_string(),
                    player_id: leaver_id.to_string(),
                    kind: GameEventKind::PlayerQuit(GameOverPayload {
                        winner,
                        reason: Some(reason),
                    }),
                },
            )
            .await;
            schedule_room_cleanup(state.clone(), room_id.to_string());
        },
        Ok(None) => {},
        Err(e) => {
            tracing::warn!(room_id = %room_id, error = %e, "early-end transaction failed");
        },
    }
}
