use crumble_core::event::{MatchNotification, QueueEntry};
use crumble_core::room::RoomState;
use crumble_core::time::{unix_now, unix_now_millis};

use crate::identity::VerifiedUser;
use crate::state::AppState;
use crate::store::{StoreError, keys};

/// JOIN_QUEUE: advertise the player in the shared queue. Re-joining
/// replaces any previous entry for the same user (idempotent enqueue).
pub async fn enqueue(state: &AppState, user: &VerifiedUser) -> Result<(), StoreError> {
    remove_from_queue(state, &user.user_id).await?;

    let entry = QueueEntry {
        user_id: user.user_id.clone(),
        name: user.name.clone(),
        avatar: user.avatar.clone(),
        replica_id: state.replica_id.clone(),
        joined_at: unix_now(),
    };
    let member = serde_json::to_string(&entry)?;
    // Millisecond score keeps FIFO order among same-second arrivals.
    state
        .store
        .queue_add(keys::MATCH_QUEUE, &member, unix_now_millis() as f64)
        .await?;
    tracing::info!(user_id = %user.user_id, "player joined matchmaking queue");
    Ok(())
}

/// Remove every queue entry advertising the given user.
pub async fn remove_from_queue(state: &AppState, user_id: &str) -> Result<(), StoreError> {
    let members = state.store.queue_range(keys::MATCH_QUEUE, 0, -1).await?;
    for member in members {
        let Ok(entry) = serde_json::from_str::<QueueEntry>(&member) else {
            continue;
        };
        if entry.user_id == user_id {
            state.store.queue_remove(keys::MATCH_QUEUE, &member).await?;
        }
    }
    Ok(())
}

/// Periodic matchmaking driver. Every tick each replica races for the
/// distributed lock; the holder pops the two oldest waiting players.
pub fn spawn_match_loop(state: AppState) {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.game.match_loop_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("match loop shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = try_match(&state).await {
                        tracing::warn!(error = %e, "matchmaking attempt failed");
                    }
                }
            }
        }
    });
}

/// One matchmaking attempt. Holds `matchmaking:lock` for the duration of
/// the pop-create-publish sequence; replicas that lose the lock race skip
/// this tick.
pub(crate) async fn try_match(state: &AppState) -> Result<(), StoreError> {
    let acquired = state
        .store
        .set_if_absent(
            keys::MATCH_LOCK,
            &state.replica_id,
            state.config.game.match_lock_ttl(),
        )
        .await?;
    if !acquired {
        return Ok(());
    }

    let result = match_once(state).await;
    // Release the lock whether or not a match was made; the TTL is only a
    // crash backstop.
    if let Err(e) = state.store.kv_delete(keys::MATCH_LOCK).await {
        tracing::warn!(error = %e, "failed to release matchmaking lock");
    }
    result
}

async fn match_once(state: &AppState) -> Result<(), StoreError> {
    let Some((player1, player2)) = pop_pair(state).await? else {
        return Ok(());
    };

    let room_id = format!("{}_{}_{}", player1.user_id, player2.user_id, unix_now());
    let room = RoomState::new(
        &room_id,
        &player1,
        &player2,
        state.config.game.match_duration_secs,
        &state.replica_id,
    );
    state
        .store
        .kv_set(
            &keys::room(&room_id),
            &serde_json::to_string(&room)?,
            state.config.game.room_ttl(),
        )
        .await?;

    let notification = MatchNotification {
        player1,
        player2,
        room_id: room_id.clone(),
        timer_replica_id: state.replica_id.clone(),
    };
    state
        .store
        .publish(keys::MATCH_CHANNEL, &serde_json::to_string(&notification)?)
        .await?;

    tracing::info!(
        room_id = %room_id,
        player1 = %notification.player1.user_id,
        player2 = %notification.player2.user_id,
        "match created"
    );
    Ok(())
}

/// Take the two oldest fresh entries off the queue. Stale entries (older
/// than the queue TTL) and undecodable members are evicted on the way.
async fn pop_pair(state: &AppState) -> Result<Option<(QueueEntry, QueueEntry)>, StoreError> {
    let members = state.store.queue_range(keys::MATCH_QUEUE, 0, -1).await?;
    let now = unix_now();
    let ttl = state.config.game.queue_ttl_secs;

    let mut fresh: Vec<(String, QueueEntry)> = Vec::with_capacity(2);
    for member in members {
        let entry = match serde_json::from_str::<QueueEntry>(&member) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "evicting undecodable queue entry");
                state.store.queue_remove(keys::MATCH_QUEUE, &member).await?;
                continue;
            },
        };
        if entry.is_stale(now, ttl) {
            tracing::info!(
                user_id = %entry.user_id,
                waited = now - entry.joined_at,
                "evicting stale queue entry"
            );
            state.store.queue_remove(keys::MATCH_QUEUE, &member).await?;
            continue;
        }
        fresh.push((member, entry));
        if fresh.len() == 2 {
            break;
        }
    }

    if fresh.len() < 2 {
        return Ok(None);
    }

    for (member, _) in &fresh {
        state.store.queue_remove(keys::MATCH_QUEUE, member).await?;
    }
    let mut iter = fresh.into_iter();
    let (_, player1) = iter.next().expect("two entries");
    let (_, player2) = iter.next().expect("two entries");
    Ok(Some((player1, player2)))
}
