use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header, encode};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crumble_core::message::{ClientMessage, GameStartPayload, ServerMessage};
use crumble_core::time::unix_now;
use crumble_server::config::{GameConfig, ServerConfig};
use crumble_server::identity::Claims;
use crumble_server::persist::MatchPersistence;
use crumble_server::state::AppState;
use crumble_server::store::SharedStore;
use crumble_server::{build_app, spawn_background_tasks};

pub const TEST_SECRET: &str = "integration-test-secret";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production timings shrunk so a whole match fits in a few seconds.
/// Bonus spawns are pushed out of range by default; tests that exercise
/// the golden cookie bring them back in.
pub fn fast_config() -> ServerConfig {
    ServerConfig {
        jwt_secret: TEST_SECRET.to_string(),
        game: GameConfig {
            countdown_secs: 0,
            match_duration_secs: 3,
            bonus_interval_min_secs: 60,
            bonus_interval_max_secs: 120,
            cleanup_delay_secs: 1,
            match_loop_interval_ms: 50,
            ..GameConfig::default()
        },
        ..ServerConfig::default()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_config(fast_config(), SharedStore::in_memory()).await
    }

    /// Start a server over an existing store. Two servers sharing one
    /// memory store behave as two replicas.
    pub async fn with_store(store: SharedStore) -> Self {
        Self::with_config(fast_config(), store).await
    }

    pub async fn with_config(config: ServerConfig, store: SharedStore) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config, store, MatchPersistence::in_memory());
        spawn_background_tasks(&state);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _server: handle,
        }
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={token}", self.addr)
    }

    pub fn ws_url_without_token(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Mint a token the way the login service does.
pub fn mint_token(user_id: &str, name: &str) -> String {
    let claims = Claims {
        user_id: user_id.to_string(),
        name: name.to_string(),
        picture: format!("https://avatars.test/{user_id}.png"),
        exp: (unix_now() + 3600) as u64,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

pub async fn connect_raw(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Connect an authenticated player.
pub async fn connect_player(server: &TestServer, user_id: &str, name: &str) -> WsStream {
    connect_raw(&server.ws_url(&mint_token(user_id, name))).await
}

pub async fn send_client(stream: &mut WsStream, msg: &ClientMessage) {
    let json = serde_json::to_string(msg).unwrap();
    stream.send(Message::Text(json)).await.unwrap();
}

pub async fn join_queue(stream: &mut WsStream) {
    send_client(stream, &ClientMessage::JoinQueue {}).await;
}

/// Next decoded server message, skipping control frames (5s timeout).
pub async fn next_server_msg(stream: &mut WsStream) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text)
                        .unwrap_or_else(|e| panic!("undecodable frame {text:?}: {e}"));
                },
                Some(Ok(Message::Close(frame))) => panic!("socket closed: {frame:?}"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("socket error: {e}"),
                None => panic!("socket stream ended"),
            }
        }
    })
    .await
    .expect("timed out waiting for server message")
}

/// Like [`next_server_msg`] but returns None on timeout or close.
pub async fn try_next_server_msg(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerMessage> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).ok();
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Read messages until one matches, discarding the rest.
pub async fn wait_for<F>(stream: &mut WsStream, timeout_secs: u64, pred: F) -> ServerMessage
where
    F: Fn(&ServerMessage) -> bool,
{
    tokio::time::timeout(Duration::from_secs(timeout_secs), async {
        loop {
            let msg = next_server_msg(stream).await;
            if pred(&msg) {
                return msg;
            }
        }
    })
    .await
    .expect("timed out waiting for matching server message")
}

pub async fn expect_game_start(stream: &mut WsStream) -> GameStartPayload {
    match wait_for(stream, 5, |m| matches!(m, ServerMessage::GameStart(_))).await {
        ServerMessage::GameStart(payload) => payload,
        _ => unreachable!(),
    }
}
