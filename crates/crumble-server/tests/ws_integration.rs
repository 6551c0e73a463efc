#[allow(dead_code)]
mod common;

use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message;

use crumble_core::message::{ClientMessage, ServerMessage, UpdatePayload};
use crumble_core::record::EndReason;
use crumble_core::room::Role;
use crumble_server::store::keys;

use common::{
    TestServer, connect_player, connect_raw, expect_game_start, join_queue, next_server_msg,
    send_client, wait_for,
};

#[tokio::test]
async fn missing_token_is_closed_with_reason() {
    let server = TestServer::start().await;
    let mut stream = connect_raw(&server.ws_url_without_token()).await;

    match stream.next().await {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.reason, "authentication required");
        },
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_token_is_closed_with_reason() {
    let server = TestServer::start().await;
    let mut stream = connect_raw(&server.ws_url("not-a-real-token")).await;

    match stream.next().await {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.reason, "authentication required");
        },
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn health_endpoint_reports_backend() {
    let server = TestServer::start().await;

    let mut conn = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    conn.write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    conn.read_to_string(&mut response).await.unwrap();

    assert!(response.contains("200 OK"), "got: {response}");
    assert!(response.contains("\"healthy\""));
    assert!(response.contains("\"store\":\"memory\""));
}

#[tokio::test]
async fn duplicate_join_queue_keeps_one_entry() {
    let server = TestServer::start().await;
    let mut stream = connect_player(&server, "solo", "Solo").await;

    join_queue(&mut stream).await;
    join_queue(&mut stream).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let entries = server
        .state
        .store
        .queue_range(keys::MATCH_QUEUE, 0, -1)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains("\"solo\""));
}

#[tokio::test]
async fn malformed_frames_do_not_kill_the_connection() {
    let server = TestServer::start().await;
    let mut stream = connect_player(&server, "u1", "Alice").await;

    use futures::SinkExt;
    stream.send(Message::Text("this is not json".into())).await.unwrap();
    stream
        .send(Message::Text(r#"{"type":"NO_SUCH_TYPE","payload":{}}"#.into()))
        .await
        .unwrap();

    // Connection survives: a real JOIN_QUEUE still lands.
    join_queue(&mut stream).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let entries = server
        .state
        .store
        .queue_range(keys::MATCH_QUEUE, 0, -1)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn happy_path_match_clicks_and_game_over() {
    let server = TestServer::start().await;
    let mut alice = connect_player(&server, "alice", "Alice").await;
    let mut bob = connect_player(&server, "bob", "Bob").await;

    join_queue(&mut alice).await;
    // A beat to make Alice's enqueue visibly older than Bob's.
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    join_queue(&mut bob).await;

    let alice_start = expect_game_start(&mut alice).await;
    let bob_start = expect_game_start(&mut bob).await;

    assert_eq!(alice_start.room_id, bob_start.room_id);
    assert_eq!(alice_start.opponent, "bob");
    assert_eq!(bob_start.opponent, "alice");
    assert_eq!(alice_start.role, Role::P1, "first to queue is p1");
    assert_eq!(bob_start.role, Role::P2);
    assert_eq!(alice_start.time_remaining, 3);
    assert_eq!(alice_start.p1_name, "Alice");
    assert_eq!(alice_start.p2_name, "Bob");

    // Alice out-clicks Bob.
    for _ in 0..5 {
        send_client(&mut alice, &ClientMessage::Click {}).await;
    }
    for _ in 0..2 {
        send_client(&mut bob, &ClientMessage::Click {}).await;
    }

    // The authoritative clock strictly counts down and never goes
    // negative; the match ends naming Alice.
    let mut last_remaining = i64::MAX;
    let winner = loop {
        match next_server_msg(&mut alice).await {
            ServerMessage::Update(UpdatePayload::Snapshot(snap)) => {
                assert!(snap.time_remaining < last_remaining, "clock must decrease");
                assert!(snap.time_remaining >= 0);
                last_remaining = snap.time_remaining;
            },
            ServerMessage::GameOver(over) => break over,
            _ => {},
        }
    };
    assert_eq!(winner.winner, "alice");
    assert_eq!(winner.reason, None);

    let bob_over = wait_for(&mut bob, 10, |m| matches!(m, ServerMessage::GameOver(_))).await;
    match bob_over {
        ServerMessage::GameOver(over) => assert_eq!(over.winner, "alice"),
        _ => unreachable!(),
    }

    // Exactly two records, reason normal, one winner.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let games = server.state.persistence.saved_games();
    assert_eq!(games.len(), 2);
    assert!(games.iter().all(|g| g.reason == EndReason::Normal));
    assert_eq!(games.iter().filter(|g| g.won).count(), 1);
    assert_eq!(server.state.persistence.total_score("alice"), 5);
    assert_eq!(server.state.persistence.total_score("bob"), 2);
}

#[tokio::test]
async fn scoreless_match_is_a_draw() {
    let server = TestServer::start().await;
    let mut alice = connect_player(&server, "alice", "Alice").await;
    let mut bob = connect_player(&server, "bob", "Bob").await;

    join_queue(&mut alice).await;
    join_queue(&mut bob).await;
    expect_game_start(&mut alice).await;
    expect_game_start(&mut bob).await;

    let over = wait_for(&mut alice, 10, |m| matches!(m, ServerMessage::GameOver(_))).await;
    match over {
        ServerMessage::GameOver(over) => {
            assert_eq!(over.winner, "draw");
            assert_eq!(over.reason, None);
        },
        _ => unreachable!(),
    }

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let games = server.state.persistence.saved_games();
    assert_eq!(games.len(), 2);
    assert!(games.iter().all(|g| !g.won), "a draw has no winner");
}
