use std::time::Duration;

use rand::Rng;

use crumble_core::event::{GameEvent, GameEventKind};
use crumble_core::message::GameOverPayload;
use crumble_core::record::EndReason;
use crumble_core::room::{RoomState, SPAWN_COORD_MAX, SPAWN_COORD_MIN};

use crate::gameplay::{publish_event, schedule_room_cleanup, transact_room};
use crate::persist;
use crate::state::AppState;
use crate::store::StoreError;

/// Consecutive tick failures tolerated before the match is abandoned.
const MAX_TICK_FAILURES: u32 = 3;

/// Start the authoritative clock for a room. Called on exactly one
/// replica per room — the one that created the match.
pub fn spawn(state: AppState, room_id: String) {
    tokio::spawn(async move {
        run(state, room_id).await;
    });
}

enum TickOutcome {
    Continue,
    Ended,
}

async fn run(state: AppState, room_id: String) {
    // Pre-game countdown. A scheduled wake rather than a detached sleep:
    // shutdown cancels it, and a room that ended during the countdown
    // (quit or disconnect) never starts ticking.
    tokio::select! {
        _ = state.shutdown.cancelled() => return,
        _ = tokio::time::sleep(state.config.game.countdown()) => {},
    }

    let started = transact_room(&state, &room_id, |room| room.start_running()).await;
    let room = match started {
        Ok(Some(room)) => room,
        Ok(None) => {
            tracing::info!(room_id = %room_id, "room gone or ended before countdown finished");
            return;
        },
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "failed to start room");
            return;
        },
    };

    tracing::info!(room_id = %room_id, "match running");
    // Initial snapshot so both clients render the full clock.
    publish_snapshot(&state, &room).await;

    let bonus_task = tokio::spawn(bonus_loop(state.clone(), room_id.clone()));

    let mut interval = tokio::time::interval_at(
        tokio::time::Instant::now() + Duration::from_secs(1),
        Duration::from_secs(1),
    );
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = interval.tick() => {
                match tick(&state, &room_id).await {
                    Ok(TickOutcome::Continue) => failures = 0,
                    Ok(TickOutcome::Ended) => break,
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(
                            room_id = %room_id,
                            failures,
                            error = %e,
                            "tick failed"
                        );
                        if failures >= MAX_TICK_FAILURES {
                            abandon(&state, &room_id).await;
                            break;
                        }
                    },
                }
            }
        }
    }

    bonus_task.abort();
}

/// One second of authoritative time: decrement, save, broadcast, and end
/// the match at zero. Exits as soon as an end written by any replica
/// (quit, disconnect) is observed.
async fn tick(state: &AppState, room_id: &str) -> Result<TickOutcome, StoreError> {
    let committed = transact_room(state, room_id, |room| {
        if room.ended() {
            return false;
        }
        room.time_remaining = (room.time_remaining - 1).max(0);
        true
    })
    .await?;

    let Some(room) = committed else {
        // Ended elsewhere or already cleaned up.
        return Ok(TickOutcome::Ended);
    };

    publish_snapshot(state, &room).await;

    if room.time_remaining <= 0 {
        end_of_match(state, room_id).await?;
        return Ok(TickOutcome::Ended);
    }
    Ok(TickOutcome::Continue)
}

async fn publish_snapshot(state: &AppState, room: &RoomState) {
    publish_event(
        state,
        &GameEvent {
            room_id: room.room_id.clone(),
            player_id: String::new(),
            kind: GameEventKind::StateUpdate(room.snapshot()),
        },
    )
    .await;
}

/// Normal end: settle the winner by score, announce, persist both seats,
/// and schedule the stored state for deletion.
async fn end_of_match(state: &AppState, room_id: &str) -> Result<(), StoreError> {
    let committed = transact_room(state, room_id, |room| {
        if room.ended() {
            return false;
        }
        let winner = room.winner_from_scores();
        room.end(winner)
    })
    .await?;

    let Some(room) = committed else {
        // Someone else ended it first; they own the announcement.
        return Ok(());
    };

    let winner = room.winner().unwrap_or_default().to_string();
    tracing::info!(
        room_id = %room_id,
        winner = %winner,
        p1_score = room.p1_score,
        p2_score = room.p2_score,
        "match finished"
    );

    publish_event(
        state,
        &GameEvent {
            room_id: room_id.to_string(),
            player_id: String::new(),
            kind: GameEventKind::GameEnd(GameOverPayload {
                winner,
                reason: None,
            }),
        },
    )
    .await;

    // Persistence must never hold up the event path.
    let persistence = state.persistence.clone();
    let finished = room.clone();
    tokio::spawn(async move {
        persist::record_match(&persistence, &finished).await;
    });

    schedule_room_cleanup(state.clone(), room_id.to_string());
    Ok(())
}

/// The store went away mid-match. End for both players without a winner
/// ranking and without persistence.
async fn abandon(state: &AppState, room_id: &str) {
    tracing::error!(room_id = %room_id, "abandoning match after repeated store failures");
    let committed = transact_room(state, room_id, |room| {
        if room.ended() {
            return false;
        }
        room.end(crumble_core::room::DRAW.to_string())
    })
    .await;

    if matches!(committed, Ok(Some(_))) {
        publish_event(
            state,
            &GameEvent {
                room_id: room_id.to_string(),
                player_id: String::new(),
                kind: GameEventKind::PlayerQuit(GameOverPayload {
                    winner: crumble_core::room::DRAW.to_string(),
                    reason: Some(EndReason::OpponentDisconnected),
                }),
            },
        )
        .await;
        schedule_room_cleanup(state.clone(), room_id.to_string());
    }
}

/// Golden cookie scheduler: after each uniformly random interval, place
/// the bonus somewhere visible and announce it. A spawn while one is
/// already active just moves it. Exits once the room leaves Running.
async fn bonus_loop(state: AppState, room_id: String) {
    let min = state.config.game.bonus_interval_min_secs as f64;
    let max = state.config.game.bonus_interval_max_secs as f64;
    loop {
        let wait = {
            let mut rng = rand::rng();
            Duration::from_secs_f64(rng.random_range(min..max))
        };
        tokio::select! {
            _ = state.shutdown.cancelled() => return,
            _ = tokio::time::sleep(wait) => {},
        }

        let (x, y) = {
            let mut rng = rand::rng();
            (
                rng.random_range(SPAWN_COORD_MIN..SPAWN_COORD_MAX),
                rng.random_range(SPAWN_COORD_MIN..SPAWN_COORD_MAX),
            )
        };

        match transact_room(&state, &room_id, |room| room.spawn_golden(x, y)).await {
            Ok(Some(_)) => {
                tracing::debug!(room_id = %room_id, x, y, "golden cookie spawned");
                publish_event(
                    &state,
                    &GameEvent {
                        room_id: room_id.clone(),
                        player_id: String::new(),
                        kind: GameEventKind::GoldenSpawn { x, y },
                    },
                )
                .await;
            },
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(room_id = %room_id, error = %e, "golden spawn failed");
            },
        }
    }
}
