#[allow(dead_code)]
mod common;

use std::time::Duration;

use crumble_core::message::{ClientMessage, ServerMessage, UpdatePayload};
use crumble_core::record::EndReason;
use crumble_server::config::GameConfig;
use crumble_server::store::{SharedStore, keys};

use common::{
    TestServer, connect_player, expect_game_start, fast_config, join_queue, send_client,
    try_next_server_msg, wait_for,
};

/// Config with the golden cookie spawning quickly and a match long enough
/// to use it.
fn golden_config() -> crumble_server::config::ServerConfig {
    let mut config = fast_config();
    config.game = GameConfig {
        countdown_secs: 0,
        match_duration_secs: 10,
        bonus_interval_min_secs: 1,
        bonus_interval_max_secs: 2,
        cleanup_delay_secs: 1,
        match_loop_interval_ms: 50,
        ..GameConfig::default()
    };
    config
}

async fn start_match(server: &TestServer) -> (common::WsStream, common::WsStream, String) {
    let mut alice = connect_player(server, "alice", "Alice").await;
    let mut bob = connect_player(server, "bob", "Bob").await;
    join_queue(&mut alice).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    join_queue(&mut bob).await;
    let start = expect_game_start(&mut alice).await;
    expect_game_start(&mut bob).await;
    (alice, bob, start.room_id)
}

#[tokio::test]
async fn opponent_sees_click_notifications() {
    let server = TestServer::start().await;
    let (mut alice, mut bob, _room) = start_match(&server).await;

    send_client(&mut alice, &ClientMessage::Click {}).await;

    let msg = wait_for(&mut bob, 5, |m| matches!(m, ServerMessage::OpponentClick(_))).await;
    match msg {
        ServerMessage::OpponentClick(click) => assert_eq!(click.count, 1),
        _ => unreachable!(),
    }

    // The clicker gets no notification for their own click.
    send_client(&mut bob, &ClientMessage::Click {}).await;
    let msg = wait_for(&mut alice, 5, |m| matches!(m, ServerMessage::OpponentClick(_))).await;
    match msg {
        ServerMessage::OpponentClick(click) => assert_eq!(click.count, 1),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn golden_cookie_race_has_one_winner_and_doubles_clicks() {
    let server = TestServer::with_config(golden_config(), SharedStore::in_memory()).await;
    let (mut alice, mut bob, _room) = start_match(&server).await;

    // Both players see the spawn.
    let spawn = wait_for(&mut alice, 8, |m| matches!(m, ServerMessage::CookieSpawn(_))).await;
    match spawn {
        ServerMessage::CookieSpawn(pos) => {
            assert!((5.0..95.0).contains(&pos.x));
            assert!((5.0..95.0).contains(&pos.y));
        },
        _ => unreachable!(),
    }
    wait_for(&mut bob, 8, |m| matches!(m, ServerMessage::CookieSpawn(_))).await;

    // Both race the claim.
    send_client(&mut alice, &ClientMessage::CookieClick {}).await;
    send_client(&mut bob, &ClientMessage::CookieClick {}).await;

    let claim = wait_for(&mut alice, 5, |m| {
        matches!(m, ServerMessage::Update(UpdatePayload::Claim(_)))
    })
    .await;
    let claimed_by = match claim {
        ServerMessage::Update(UpdatePayload::Claim(c)) => c.golden_cookie_claimed_by,
        _ => unreachable!(),
    };
    assert!(claimed_by == "alice" || claimed_by == "bob");

    // The winner's next click registers double at the loser's side; the
    // loser's clicks stay single.
    let (mut winner, mut loser) = if claimed_by == "alice" {
        (alice, bob)
    } else {
        (bob, alice)
    };
    send_client(&mut winner, &ClientMessage::Click {}).await;
    let msg = wait_for(&mut loser, 5, |m| matches!(m, ServerMessage::OpponentClick(_))).await;
    match msg {
        ServerMessage::OpponentClick(click) => assert_eq!(click.count, 2),
        _ => unreachable!(),
    }

    send_client(&mut loser, &ClientMessage::Click {}).await;
    let msg = wait_for(&mut winner, 5, |m| matches!(m, ServerMessage::OpponentClick(_))).await;
    match msg {
        ServerMessage::OpponentClick(click) => assert_eq!(click.count, 1),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn quit_forfeits_to_the_opponent() {
    let server = TestServer::start().await;
    let (mut alice, mut bob, room_id) = start_match(&server).await;

    send_client(&mut alice, &ClientMessage::QuitGame {}).await;

    for stream in [&mut alice, &mut bob] {
        let over = wait_for(stream, 5, |m| matches!(m, ServerMessage::GameOver(_))).await;
        match over {
            ServerMessage::GameOver(over) => {
                assert_eq!(over.winner, "bob");
                assert_eq!(over.reason, Some(EndReason::Quit));
            },
            _ => unreachable!(),
        }
    }

    // Quit-terminated matches are never persisted.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.state.persistence.saved_games().is_empty());

    // Room state is deleted after the cleanup delay.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let stored = server.state.store.kv_get(&keys::room(&room_id)).await.unwrap();
    assert_eq!(stored, None);
}

#[tokio::test]
async fn disconnect_awards_the_opponent() {
    let server = TestServer::start().await;
    let (alice, mut bob, room_id) = start_match(&server).await;

    // Alice's socket dies mid-match.
    drop(alice);

    let over = wait_for(&mut bob, 5, |m| matches!(m, ServerMessage::GameOver(_))).await;
    match over {
        ServerMessage::GameOver(over) => {
            assert_eq!(over.winner, "bob");
            assert_eq!(over.reason, Some(EndReason::OpponentDisconnected));
        },
        _ => unreachable!(),
    }

    // Disconnect-terminated matches are never persisted.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.state.persistence.saved_games().is_empty());

    // The clock stops: no further snapshots after the forfeit settles.
    while try_next_server_msg(&mut bob, 300).await.is_some() {}
    assert!(try_next_server_msg(&mut bob, 1_500).await.is_none());

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let stored = server.state.store.kv_get(&keys::room(&room_id)).await.unwrap();
    assert_eq!(stored, None);
}

#[tokio::test]
async fn disconnect_while_queued_removes_the_entry() {
    let server = TestServer::start().await;
    let mut alice = connect_player(&server, "alice", "Alice").await;
    join_queue(&mut alice).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    drop(alice);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let entries = server
        .state
        .store
        .queue_range(keys::MATCH_QUEUE, 0, -1)
        .await
        .unwrap();
    assert!(entries.is_empty(), "queue entry should be removed on disconnect");
}
