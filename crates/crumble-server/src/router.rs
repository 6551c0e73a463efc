use crumble_core::event::{GameEvent, GameEventKind, MatchNotification, QueueEntry};
use crumble_core::message::{
    CookieSpawnPayload, GameStartPayload, OpponentClickPayload, ServerMessage, UpdatePayload,
    encode_server_message,
};
use crumble_core::room::Role;

use crate::room_runtime;
use crate::state::AppState;
use crate::store::keys;

/// Per-replica bus consumer: match notifications become GAME_START frames
/// and (on the elected replica) a room runtime; game events become frames
/// for whichever participants are connected here.
pub fn spawn_event_router(state: AppState) {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut matches = match state.store.subscribe(keys::MATCH_CHANNEL).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(error = %e, "cannot subscribe to match channel");
                return;
            },
        };
        let mut events = match state.store.subscribe(keys::EVENT_CHANNEL).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(error = %e, "cannot subscribe to event channel");
                return;
            },
        };

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("event router shutting down");
                    break;
                }
                msg = matches.recv() => match msg {
                    Ok(payload) => handle_match_notification(&state, &payload),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "match channel lagged");
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                msg = events.recv() => match msg {
                    Ok(payload) => handle_game_event(&state, &payload),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event channel lagged");
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}

fn handle_match_notification(state: &AppState, payload: &str) {
    let note: MatchNotification = match serde_json::from_str(payload) {
        Ok(note) => note,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable match notification");
            return;
        },
    };

    greet_local_participant(state, &note, &note.player1, &note.player2, Role::P1);
    greet_local_participant(state, &note, &note.player2, &note.player1, Role::P2);

    // Only the elected replica runs the clock for this room.
    if note.timer_replica_id == state.replica_id {
        room_runtime::spawn(state.clone(), note.room_id.clone());
    }
}

/// If the given participant is connected on this replica, bind them to
/// the room and deliver GAME_START.
fn greet_local_participant(
    state: &AppState,
    note: &MatchNotification,
    player: &QueueEntry,
    opponent: &QueueEntry,
    role: Role,
) {
    if !state.registry.is_connected(&player.user_id) {
        return;
    }
    state.registry.set_room(&player.user_id, &note.room_id);

    let payload = GameStartPayload {
        opponent: opponent.user_id.clone(),
        role,
        room_id: note.room_id.clone(),
        time_remaining: state.config.game.match_duration_secs,
        p1_score: 0,
        p2_score: 0,
        p1_name: note.player1.name.clone(),
        p2_name: note.player2.name.clone(),
        p1_picture: note.player1.avatar.clone(),
        p2_picture: note.player2.avatar.clone(),
    };
    send_reliable_or_drop(state, &player.user_id, &ServerMessage::GameStart(payload));
}

fn handle_game_event(state: &AppState, payload: &str) {
    let event: GameEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable game event");
            return;
        },
    };

    let members = state.registry.local_members(&event.room_id);
    if members.is_empty() {
        return;
    }

    match event.kind {
        GameEventKind::StateUpdate(snapshot) => {
            let msg = ServerMessage::Update(UpdatePayload::Snapshot(snapshot));
            send_lossy_to_all(state, &members, &msg);
        },
        GameEventKind::GoldenSpawn { x, y } => {
            let msg = ServerMessage::CookieSpawn(CookieSpawnPayload { x, y });
            send_lossy_to_all(state, &members, &msg);
        },
        GameEventKind::GoldenClaim(claim) => {
            let msg = ServerMessage::Update(UpdatePayload::Claim(claim));
            send_lossy_to_all(state, &members, &msg);
        },
        GameEventKind::Click { count } => {
            // The clicker sees their own score locally; only the opponent
            // gets the hit marker.
            let msg = ServerMessage::OpponentClick(OpponentClickPayload { count });
            let Ok(frame) = encode_frame(&msg) else { return };
            for (user_id, _) in &members {
                if user_id != &event.player_id {
                    state.registry.send_lossy(user_id, &frame);
                }
            }
        },
        GameEventKind::GameEnd(over) | GameEventKind::PlayerQuit(over) => {
            let msg = ServerMessage::GameOver(over);
            for (user_id, _) in &members {
                send_reliable_or_drop(state, user_id, &msg);
                state.registry.clear_room(user_id);
            }
        },
    }
}

fn encode_frame(msg: &ServerMessage) -> Result<String, ()> {
    encode_server_message(msg).map_err(|e| {
        tracing::error!(error = %e, "outbound frame failed to encode");
    })
}

fn send_lossy_to_all(
    state: &AppState,
    members: &[(String, crate::registry::FrameSender)],
    msg: &ServerMessage,
) {
    let Ok(frame) = encode_frame(msg) else { return };
    for (user_id, _) in members {
        state.registry.send_lossy(user_id, &frame);
    }
}

/// Reliable frames that cannot be buffered kill the connection: losing a
/// GAME_START or GAME_OVER leaves the client in a dead UI state.
fn send_reliable_or_drop(state: &AppState, user_id: &str, msg: &ServerMessage) {
    let Ok(frame) = encode_frame(msg) else { return };
    if !state.registry.send_reliable(user_id, &frame) {
        tracing::warn!(user_id, "reliable frame undeliverable, dropping connection");
        state.registry.drop_connection(user_id);
    }
}
