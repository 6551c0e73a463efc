use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crumble_core::message::{ClientMessage, decode_client_message};

use crate::identity::VerifiedUser;
use crate::registry::SEND_BUFFER;
use crate::state::{AppState, ConnectionGuard};
use crate::{gameplay, matchmaker, registry};

/// Time allowed to write a frame to the peer.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between inbound frames (pongs included) before the
/// connection is considered dead.
const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping cadence; must be under PONG_WAIT so a healthy peer always
/// refreshes its deadline in time.
const PING_PERIOD: Duration = Duration::from_secs(54);

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    // Authenticate before anything else; the close frame carries the
    // reason so clients can distinguish auth failure from flakiness.
    let user = match token.as_deref().map(|t| state.identity.verify(t)) {
        Some(Ok(user)) => user,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "socket rejected: invalid token");
            close_with_reason(socket, "authentication required").await;
            return;
        },
        None => {
            tracing::warn!("socket rejected: no token");
            close_with_reason(socket, "authentication required").await;
            return;
        },
    };

    let _guard = ConnectionGuard::new(state.ws_connection_count.clone());
    let (ws_sender, ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<String>(SEND_BUFFER);
    let serial = state
        .registry
        .register(&user.user_id, &user.name, &user.avatar, tx);
    tracing::info!(user_id = %user.user_id, name = %user.name, "player connected");

    spawn_writer(ws_sender, rx);
    read_loop(ws_receiver, &state, &user).await;

    disconnect_cleanup(&state, &user, serial).await;
    tracing::info!(user_id = %user.user_id, "player disconnected");
}

async fn close_with_reason(mut socket: WebSocket, reason: &'static str) {
    let frame = CloseFrame {
        code: close_code::NORMAL,
        reason: Utf8Bytes::from_static(reason),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "failed to send close frame");
    }
}

/// Single writer per connection: drains the bounded send buffer and keeps
/// the peer alive with application-level pings. Exits on write timeout,
/// write error, or channel close (connection replaced or dropped), and
/// sends a close frame so the peer's read half unblocks too.
fn spawn_writer(mut ws_sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<String>) {
    tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + PING_PERIOD,
            PING_PERIOD,
        );
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    let send = ws_sender.send(Message::Text(frame.into()));
                    match tokio::time::timeout(WRITE_WAIT, send).await {
                        Ok(Ok(())) => {},
                        _ => return,
                    }
                }
                _ = ping.tick() => {
                    let send = ws_sender.send(Message::Ping(axum::body::Bytes::new()));
                    match tokio::time::timeout(WRITE_WAIT, send).await {
                        Ok(Ok(())) => {},
                        _ => return,
                    }
                }
            }
        }
        let _ = ws_sender.close().await;
    });
}

/// Reader pump: every inbound frame (pongs included) refreshes the read
/// deadline; a silent peer is torn down after PONG_WAIT.
async fn read_loop(mut ws_receiver: SplitStream<WebSocket>, state: &AppState, user: &VerifiedUser) {
    loop {
        let msg = match tokio::time::timeout(PONG_WAIT, ws_receiver.next()).await {
            Err(_) => {
                tracing::debug!(user_id = %user.user_id, "read deadline exceeded");
                break;
            },
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => dispatch(state, user, text.as_str()).await,
            Message::Close(_) => break,
            // axum answers pings itself; both directions refresh the deadline.
            Message::Ping(_) | Message::Pong(_) => {},
            Message::Binary(_) => {
                tracing::debug!(user_id = %user.user_id, "ignoring binary frame");
            },
        }
    }
}

/// Decode-and-route for one inbound frame. Malformed frames are dropped
/// without killing the connection.
async fn dispatch(state: &AppState, user: &VerifiedUser, frame: &str) {
    let msg = match decode_client_message(frame) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(user_id = %user.user_id, error = %e, "dropping bad frame");
            return;
        },
    };

    match msg {
        ClientMessage::JoinQueue {} => {
            if let Err(e) = matchmaker::enqueue(state, user).await {
                tracing::warn!(user_id = %user.user_id, error = %e, "enqueue failed");
            }
        },
        ClientMessage::Click {} => gameplay::handle_click(state, &user.user_id).await,
        ClientMessage::CookieClick {} => gameplay::handle_cookie_click(state, &user.user_id).await,
        ClientMessage::QuitGame {} => gameplay::handle_quit(state, &user.user_id).await,
    }
}

/// Socket teardown: unless a newer connection for the same user has
/// already superseded this one, drop the registry entries, leave the
/// matchmaking queue, and forfeit any active match to the opponent.
async fn disconnect_cleanup(state: &AppState, user: &VerifiedUser, serial: u64) {
    let outcome = state.registry.unregister(&user.user_id, serial);
    let room_id = match outcome {
        registry::Unregistered::Superseded => return,
        registry::Unregistered::Removed { room_id } => room_id,
    };

    if let Err(e) = matchmaker::remove_from_queue(state, &user.user_id).await {
        tracing::warn!(user_id = %user.user_id, error = %e, "queue cleanup failed");
    }

    if let Some(room_id) = room_id {
        gameplay::handle_disconnect(state, &user.user_id, &room_id).await;
    }
}
