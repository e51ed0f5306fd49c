//! Integration tests for the chat server over real TCP connections.

mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::net::TcpStream;

use chatterbox::protocol::{Frame, HistoryEntry};
use chatterbox::{Channel, ChatStore, Framing, ModerationOutcome, ServerEvent};

use common::{TestServer, DEFAULT_TIMEOUT};

#[tokio::test]
async fn test_message_reaches_every_session_and_is_stored_once() {
    let server = TestServer::start().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    let mut carol = server.join("carol").await;

    alice.say("General", "hello").await;

    for client in [&mut alice, &mut bob, &mut carol] {
        assert_eq!(client.recv_record().await, "alice:General:hello");
    }

    assert!(server.wait_for_messages(1).await);
    let history = server.store.fetch_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].username, "alice");
    assert_eq!(history[0].channel, "General");
    assert_eq!(history[0].content, "hello");
}

#[tokio::test]
async fn test_content_may_contain_colons() {
    let server = TestServer::start().await;
    let mut bob = server.join("bob").await;

    bob.say("IT", "printer: on fire").await;
    assert_eq!(bob.recv_record().await, "bob:IT:printer: on fire");
}

#[tokio::test]
async fn test_history_replayed_in_order_before_live_traffic() {
    let server = TestServer::start().await;
    let first = Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2024, 3, 1, 9, 16, 0).unwrap();
    server
        .store
        .persist_message("alice", "General", "hi", first)
        .await
        .unwrap();
    server
        .store
        .persist_message("bob", "IT", "printer: on fire", second)
        .await
        .unwrap();

    let mut carol = server.connect().await;
    carol.handshake("carol").await;

    let line = carol.recv_history().await;
    assert_eq!(line, "history 09:15 - alice: General:hi");
    let entry = HistoryEntry::parse(&line).unwrap();
    assert_eq!(entry.username, "alice");
    assert_eq!(entry.channel, Channel::General);

    let entry = HistoryEntry::parse(&carol.recv_history().await).unwrap();
    assert_eq!(entry.time, "09:16");
    assert_eq!(entry.username, "bob");
    assert_eq!(entry.channel, Channel::It);
    assert_eq!(entry.content, "printer: on fire");

    assert!(server.wait_for_sessions(1).await);
    carol.say("General", "live").await;
    assert_eq!(carol.recv_record().await, "carol:General:live");
}

#[tokio::test]
async fn test_history_uses_configured_timezone() {
    let server = TestServer::start_with(|config| config.timezone = "Asia/Tokyo".into()).await;
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap();
    server
        .store
        .persist_message("alice", "General", "hi", at)
        .await
        .unwrap();

    let mut bob = server.connect().await;
    bob.handshake("bob").await;
    assert_eq!(
        bob.recv_history().await,
        "history 18:15 - alice: General:hi"
    );
}

#[tokio::test]
async fn test_empty_history_sends_nothing() {
    let server = TestServer::start().await;
    let mut alice = server.join("alice").await;
    assert!(alice.expect_silence().await);
}

#[tokio::test]
async fn test_banned_user_closed_without_history() {
    let server = TestServer::start().await;
    server
        .store
        .persist_message("alice", "General", "hi", Utc::now())
        .await
        .unwrap();
    server.store.ban("eve").await.unwrap();

    let mut eve = server.connect().await;
    eve.handshake("EVE").await;

    assert_eq!(eve.recv_frame().await, None);
    assert_eq!(server.registry.count().await, 0);
}

#[tokio::test]
async fn test_ban_kicks_and_notifies() {
    let server = TestServer::start().await;
    let mut alice = server.join("alice").await;
    let mut eve = server.join("eve").await;

    let outcome = server.moderator.ban("eve").await.unwrap();
    assert_eq!(
        outcome,
        ModerationOutcome::Banned {
            username: "eve".into(),
            kicked: 1
        }
    );
    assert!(eve.expect_closed().await);
    assert_eq!(
        alice.recv_record().await,
        "Server: user eve has been banned."
    );

    // Banning again changes nothing and stays quiet.
    let outcome = server.moderator.ban("eve").await.unwrap();
    assert!(matches!(outcome, ModerationOutcome::AlreadyBanned { .. }));
    assert!(alice.expect_silence().await);

    let mut again = server.connect().await;
    again.handshake("eve").await;
    assert!(again.expect_closed().await);
    assert!(!server.registry.is_user_connected("eve").await);
}

#[tokio::test]
async fn test_ban_during_history_load_keeps_user_out() {
    let server = TestServer::start_with_history_delay(Duration::from_millis(300)).await;
    server
        .store
        .persist_message("alice", "General", "hi", Utc::now())
        .await
        .unwrap();

    let mut eve = server.connect().await;
    eve.handshake("eve").await;
    // Ban lands while the handler is still loading history.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let outcome = server.moderator.ban("eve").await.unwrap();
    assert_eq!(
        outcome,
        ModerationOutcome::Banned {
            username: "eve".into(),
            kicked: 0
        }
    );

    assert_eq!(eve.recv_frame().await, None);
    assert!(server.wait_for_sessions(0).await);
    assert!(!server.registry.is_user_connected("eve").await);
}

#[tokio::test]
async fn test_ban_in_other_case_kicks_connected_user() {
    let server = TestServer::start().await;
    let mut eve = server.join("eve").await;

    let outcome = server.moderator.ban("EVE").await.unwrap();
    assert_eq!(
        outcome,
        ModerationOutcome::Banned {
            username: "EVE".into(),
            kicked: 1
        }
    );
    assert!(eve.expect_closed().await);
    assert!(server.wait_for_sessions(0).await);
    assert!(!server.registry.is_user_connected("eve").await);
}

#[tokio::test]
async fn test_unban_allows_reconnect() {
    let server = TestServer::start().await;
    let mut alice = server.join("alice").await;
    server.store.ban("eve").await.unwrap();

    let outcome = server.moderator.unban("eve").await.unwrap();
    assert!(matches!(outcome, ModerationOutcome::Unbanned { .. }));
    assert_eq!(
        alice.recv_record().await,
        "Server: user eve has been unbanned."
    );

    let _eve = server.join("eve").await;
    assert!(server.registry.is_user_connected("eve").await);
}

#[tokio::test]
async fn test_kick_is_idempotent() {
    let server = TestServer::start().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;

    let outcome = server.moderator.kick("alice").await;
    assert!(matches!(
        outcome,
        ModerationOutcome::Kicked { sessions: 1, .. }
    ));
    assert!(alice.expect_closed().await);
    assert!(server.wait_for_sessions(1).await);

    let outcome = server.moderator.kick("alice").await;
    assert!(matches!(outcome, ModerationOutcome::NotConnected { .. }));

    // Kicking a stranger touches nobody.
    let outcome = server.moderator.kick("mallory").await;
    assert!(matches!(outcome, ModerationOutcome::NotConnected { .. }));
    assert!(bob.expect_silence().await);
    assert_eq!(server.registry.count().await, 1);
}

#[tokio::test]
async fn test_malformed_record_dropped_without_closing() {
    let server = TestServer::start().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;

    alice.send_record("nobody-cares").await;
    alice.say("General", "still here").await;

    assert_eq!(bob.recv_record().await, "alice:General:still here");
    assert_eq!(alice.recv_record().await, "alice:General:still here");
    assert!(server.wait_for_messages(1).await);
    assert_eq!(server.registry.count().await, 2);
}

#[tokio::test]
async fn test_history_line_from_client_is_ignored() {
    let server = TestServer::start().await;
    let mut alice = server.join("alice").await;

    alice
        .send_record("history 10:00 - mallory: General:forged")
        .await;
    assert!(alice.expect_silence().await);
    assert!(server.store.fetch_history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_usernames_share_a_kick() {
    let server = TestServer::start().await;
    let mut first = server.join("alice").await;
    let mut second = server.join("alice").await;
    assert_eq!(server.registry.find_by_username("alice").await.len(), 2);

    first.say("Chitchat", "which one am I").await;
    assert_eq!(second.recv_record().await, "alice:Chitchat:which one am I");

    let outcome = server.moderator.kick("alice").await;
    assert!(matches!(
        outcome,
        ModerationOutcome::Kicked { sessions: 2, .. }
    ));
    assert!(first.expect_closed().await);
    assert!(second.expect_closed().await);
    assert!(server.wait_for_sessions(0).await);
}

#[tokio::test]
async fn test_notice_and_announcement() {
    let server = TestServer::start().await;
    let mut alice = server.join("alice").await;

    server.moderator.notice("maintenance at noon").await;
    assert_eq!(alice.recv_record().await, "Server: maintenance at noon");

    server
        .moderator
        .say(Channel::Accounting, "books close friday")
        .await;
    assert_eq!(alice.recv_record().await, "Accounting: books close friday");

    // Operator messages are not logged.
    assert!(server.store.fetch_history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_handshake_without_marker_is_closed() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.say("General", "hi").await;
    assert_eq!(client.recv_frame().await, None);
    assert_eq!(server.registry.count().await, 0);
}

#[tokio::test]
async fn test_handshake_with_invalid_username_is_closed() {
    let server = TestServer::start().await;

    for bad in ["Server", "", "two words", "a:b"] {
        let mut client = server.connect().await;
        client.handshake(bad).await;
        assert_eq!(client.recv_frame().await, None, "accepted {bad:?}");
    }
    assert_eq!(server.registry.count().await, 0);
}

#[tokio::test]
async fn test_handshake_timeout() {
    let server = TestServer::start_with(|config| config.handshake_timeout_secs = 1).await;
    let mut client = server.connect().await;

    let started = tokio::time::Instant::now();
    assert_eq!(client.recv_frame().await, None);
    assert!(started.elapsed() < DEFAULT_TIMEOUT);
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let mut server = TestServer::start().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;

    let outcome = server.moderator.shutdown().await;
    assert_eq!(outcome, ModerationOutcome::ShutDown { closed: 2 });

    assert!(alice.expect_closed().await);
    assert!(bob.expect_closed().await);
    server.wait_stopped().await;

    assert_eq!(server.registry.count().await, 0);
    assert!(server.moderator.is_shutting_down());
    assert!(TcpStream::connect(server.addr).await.is_err());
}

#[tokio::test]
async fn test_events_follow_session_lifecycle() {
    let server = TestServer::start().await;
    let mut events = server.subscribe();

    let mut alice = server.join("alice").await;
    alice.say("Marketing", "launch").await;
    assert_eq!(alice.recv_record().await, "alice:Marketing:launch");
    drop(alice);

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let event = tokio::time::timeout(DEFAULT_TIMEOUT, events.recv())
            .await
            .expect("event timeout")
            .unwrap();
        seen.push(event);
    }

    assert!(matches!(
        &seen[0],
        ServerEvent::SessionJoined { username, .. } if username == "alice"
    ));
    assert!(matches!(
        &seen[1],
        ServerEvent::MessageReceived { username, channel, content }
            if username == "alice" && channel == "Marketing" && content == "launch"
    ));
    assert!(matches!(
        &seen[2],
        ServerEvent::SessionLeft { username, .. } if username == "alice"
    ));
    assert!(server.wait_for_sessions(0).await);
}

#[tokio::test]
async fn test_legacy_framing() {
    let server = TestServer::start_with(|config| config.framing = Framing::Legacy).await;
    server
        .store
        .persist_message(
            "alice",
            "General",
            "hi",
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 15, 0).unwrap(),
        )
        .await
        .unwrap();

    let mut bob = server.connect().await;
    bob.handshake("bob").await;
    assert_eq!(
        bob.recv_frame().await,
        Some(Frame::History("history 09:15 - alice: General:hi".into()))
    );
    assert!(server.wait_for_sessions(1).await);

    bob.say("General", "no newline needed").await;
    assert_eq!(bob.recv_record().await, "bob:General:no newline needed");
}

#[tokio::test]
async fn test_connection_limit() {
    let server = TestServer::start_with(|config| config.max_connections = 1).await;
    let _alice = server.join("alice").await;

    // The second connection waits for a permit instead of being served.
    let mut bob = server.connect().await;
    bob.handshake("bob").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!server.registry.is_user_connected("bob").await);
}
