mod common;

use std::time::Duration;

use common::{mock_transport, server_says, test_config, MockServer};
use raptor_client::ws::{EventSink, TransportEvent};
use raptor_client::{RealtimeSession, RequestError, SessionState};
use serde_json::json;
use tokio::time::Instant;

fn new_session() -> (RealtimeSession, MockServer) {
    let (connector, server) = mock_transport();
    (RealtimeSession::with_connector(test_config(), connector), server)
}

/// Connect as `user`, let the server accept, and wait for `Connected`.
async fn open(session: &RealtimeSession, server: &mut MockServer, user: &str) -> EventSink {
    session.connect(Some(user.to_string()));
    let link = server.next_link().await;
    assert!(link.emit(TransportEvent::Opened));
    session
        .watch_state()
        .wait_for(SessionState::is_connected)
        .await
        .unwrap();
    link
}

/// Round-trip through the actor so everything queued before is processed.
async fn settle(session: &RealtimeSession) {
    session.subscriptions().await;
}

#[tokio::test(start_paused = true)]
async fn subscriptions_registered_before_connect_are_replayed_once() {
    let (session, mut server) = new_session();
    session.subscribe(["orders"]);
    session.subscribe(["chat", "orders"]);

    let link = {
        session.connect(Some("u1".into()));
        let link = server.next_link().await;
        assert_eq!(session.state(), SessionState::Connecting);
        link.emit(TransportEvent::Opened);
        link
    };
    session
        .watch_state()
        .wait_for(SessionState::is_connected)
        .await
        .unwrap();

    assert_eq!(
        server.next_frame().await,
        json!({"type": "subscribe", "channels": ["chat", "orders"]})
    );
    settle(&session).await;
    assert!(server.no_pending_frame());
    assert_eq!(link.link(), 1);
}

#[tokio::test(start_paused = true)]
async fn handshake_carries_identity() {
    let (session, mut server) = new_session();
    open(&session, &mut server, "jan@example.com").await;

    let requests = server.connect_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].user_id.as_deref(), Some("jan@example.com"));
    assert_eq!(&requests[0].client_id, session.client_id());
    assert_eq!(requests[0].client_type, "customer");
}

#[tokio::test(start_paused = true)]
async fn repeated_connect_never_opens_a_second_link() {
    let (session, mut server) = new_session();
    session.connect(Some("u1".into()));
    session.connect(Some("u1".into()));
    let link = server.next_link().await;
    link.emit(TransportEvent::Opened);
    session.connect(Some("u2".into()));
    settle(&session).await;

    assert!(server.no_pending_link());
    assert_eq!(server.connect_requests().len(), 1);
    assert_eq!(server.max_open_links(), 1);

    // Disconnect and connect again: still never two at once.
    session.disconnect().await;
    assert_eq!(server.open_links(), 0);
    session.connect(Some("u2".into()));
    server.next_link().await;
    assert_eq!(server.open_links(), 1);
    assert_eq!(server.max_open_links(), 1);
}

#[tokio::test(start_paused = true)]
async fn subscribe_while_connected_is_sent_immediately() {
    let (session, mut server) = new_session();
    open(&session, &mut server, "u1").await;

    session.subscribe(["location"]);
    assert_eq!(
        server.next_frame().await,
        json!({"type": "subscribe", "channels": ["location"]})
    );

    session.unsubscribe(["location"]);
    assert_eq!(
        server.next_frame().await,
        json!({"type": "unsubscribe", "channels": ["location"]})
    );
    assert!(session.subscriptions().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn correlated_request_gets_its_reply() {
    let (session, mut server) = new_session();
    let link = open(&session, &mut server, "u1").await;
    let mut responses = session.responses();

    let call = tokio::spawn({
        let session = session.clone();
        async move { session.fetch_order_details("42").await }
    });

    let frame = server.next_frame().await;
    assert_eq!(frame["type"], "fetch_order_details");
    assert_eq!(frame["orderId"], "42");
    let request_id = frame["requestId"].as_str().unwrap().to_string();
    assert!(request_id.starts_with(session.client_id().as_str()));

    server_says(
        &link,
        json!({"type": "order_details_response", "requestId": request_id, "data": {"status": "en_route"}}),
    );

    let data = call.await.unwrap().unwrap();
    assert_eq!(data["status"], "en_route");
    assert_eq!(responses.recv().await.unwrap().data["status"], "en_route");
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out_and_leaves_the_table() {
    let (session, mut server) = new_session();
    open(&session, &mut server, "u1").await;

    let started = Instant::now();
    let result = session.fetch_customer_profile("u1").await;

    assert_eq!(result, Err(RequestError::Timeout(Duration::from_secs(10))));
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(session.pending_requests(), 0);

    let frame = server.next_frame().await;
    assert_eq!(frame["type"], "fetch_customer_profile");
    assert_eq!(frame["customerEmail"], "u1");
}

#[tokio::test(start_paused = true)]
async fn stale_and_duplicate_replies_are_ignored() {
    let (session, mut server) = new_session();
    let link = open(&session, &mut server, "u1").await;
    let mut responses = session.responses();

    let call = tokio::spawn({
        let session = session.clone();
        async move { session.fetch_active_drivers().await }
    });
    let request_id = server.next_frame().await["requestId"]
        .as_str()
        .unwrap()
        .to_string();

    server_says(
        &link,
        json!({"type": "active_drivers_response", "requestId": "old-session-1-0", "data": {"n": 0}}),
    );
    settle(&session).await;
    assert_eq!(session.pending_requests(), 1);
    assert!(responses.try_recv().is_err());

    server_says(
        &link,
        json!({"type": "active_drivers_response", "requestId": request_id, "data": {"n": 4}}),
    );
    server_says(
        &link,
        json!({"type": "active_drivers_response", "requestId": request_id, "data": {"n": 9}}),
    );
    settle(&session).await;

    assert_eq!(call.await.unwrap().unwrap()["n"], 4);
    assert_eq!(responses.recv().await.unwrap().data["n"], 4);
    assert!(responses.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn server_error_fails_only_the_matching_caller() {
    let (session, mut server) = new_session();
    let link = open(&session, &mut server, "u1").await;

    let call = tokio::spawn({
        let session = session.clone();
        async move { session.fetch_order_history("u1", Some(5)).await }
    });
    let frame = server.next_frame().await;
    assert_eq!(frame["limit"], 5);

    server_says(
        &link,
        json!({"type": "error", "requestId": frame["requestId"], "message": "History unavailable"}),
    );

    assert_eq!(
        call.await.unwrap(),
        Err(RequestError::Server {
            message: "History unavailable".into()
        })
    );
    assert!(session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn disconnect_drains_every_pending_request() {
    let (session, mut server) = new_session();
    open(&session, &mut server, "u1").await;
    session.subscribe(["orders"]);
    server.next_frame().await;

    let calls: Vec<_> = (0..3)
        .map(|i| {
            let session = session.clone();
            tokio::spawn(async move { session.fetch_order_details(&format!("o{i}")).await })
        })
        .collect();
    for _ in 0..3 {
        server.next_frame().await;
    }
    assert_eq!(session.pending_requests(), 3);

    session.disconnect().await;

    assert_eq!(session.pending_requests(), 0);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.subscriptions().await.is_empty());
    assert_eq!(server.open_links(), 0);
    assert_eq!(
        server.closes(),
        vec![(1, 1000, "Client disconnecting".to_string())]
    );
    for call in calls {
        assert_eq!(call.await.unwrap(), Err(RequestError::ConnectionClosed));
    }
}

#[tokio::test(start_paused = true)]
async fn request_while_disconnected_fails_fast() {
    let (session, _server) = new_session();
    assert_eq!(
        session.fetch_active_drivers().await,
        Err(RequestError::NotConnected)
    );
    assert_eq!(session.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn sends_while_disconnected_are_dropped() {
    let (session, mut server) = new_session();
    session.send_chat_message("42", "on my way", "driver@example.com");
    open(&session, &mut server, "u1").await;
    settle(&session).await;
    assert!(server.no_pending_frame());

    session.send_chat_message("42", "here", "driver@example.com");
    let frame = server.next_frame().await;
    assert_eq!(frame["type"], "chat_message");
    assert_eq!(frame["orderId"], "42");
    assert_eq!(frame["senderEmail"], "driver@example.com");
    assert!(frame.get("requestId").is_none());
}

#[tokio::test(start_paused = true)]
async fn failure_reconnects_after_delay_with_same_identity() {
    let (session, mut server) = new_session();
    session.subscribe(["orders"]);
    let first = open(&session, &mut server, "u1").await;
    server.next_frame().await;

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.fetch_customer_orders("u1", true).await }
    });
    server.next_frame().await;

    let failed_at = Instant::now();
    first.emit(TransportEvent::Failed("connection reset".into()));

    // Pending calls die with the link.
    assert_eq!(
        pending.await.unwrap(),
        Err(RequestError::ConnectionClosed)
    );
    session
        .watch_state()
        .wait_for(|s| *s == SessionState::Disconnected)
        .await
        .unwrap();
    assert_eq!(session.last_error().as_deref(), Some("connection reset"));
    assert_eq!(server.open_links(), 0);

    let second = server.next_link().await;
    assert!(failed_at.elapsed() >= Duration::from_secs(5));
    assert_eq!(second.link(), 2);
    assert_eq!(session.state(), SessionState::Connecting);

    let requests = server.connect_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].user_id.as_deref(), Some("u1"));
    assert_eq!(requests[1].client_id, requests[0].client_id);

    // Subscriptions survive the flap.
    second.emit(TransportEvent::Opened);
    assert_eq!(
        server.next_frame().await,
        json!({"type": "subscribe", "channels": ["orders"]})
    );
    assert_eq!(session.last_error(), None);
    assert_eq!(server.max_open_links(), 1);
}

#[tokio::test(start_paused = true)]
async fn failure_before_open_holds_error_until_retry() {
    let (session, mut server) = new_session();
    session.connect(Some("u1".into()));
    let first = server.next_link().await;
    let failed_at = Instant::now();

    first.emit(TransportEvent::Failed("connection refused".into()));
    settle(&session).await;
    assert_eq!(
        session.state(),
        SessionState::Error("connection refused".into())
    );
    assert_eq!(session.last_error().as_deref(), Some("connection refused"));
    assert!(!session.is_connected());

    // Still an error, not a silent disconnect, while the retry is pending.
    tokio::time::sleep(Duration::from_secs(4)).await;
    settle(&session).await;
    assert_eq!(
        session.state(),
        SessionState::Error("connection refused".into())
    );

    let second = server.next_link().await;
    assert!(failed_at.elapsed() >= Duration::from_secs(5));
    assert_eq!(second.link(), 2);
    assert_eq!(session.state(), SessionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn server_close_also_schedules_reconnect() {
    let (session, mut server) = new_session();
    let first = open(&session, &mut server, "u1").await;

    first.emit(TransportEvent::Closed {
        code: 1001,
        reason: "going away".into(),
    });
    session
        .watch_state()
        .wait_for(|s| *s == SessionState::Disconnected)
        .await
        .unwrap();
    assert_eq!(
        session.last_error().as_deref(),
        Some("closed by server: 1001 going away")
    );

    assert_eq!(server.next_link().await.link(), 2);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_scheduled_reconnect() {
    let (session, mut server) = new_session();
    let first = open(&session, &mut server, "u1").await;

    first.emit(TransportEvent::Failed("timeout".into()));
    settle(&session).await;
    session.disconnect().await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    settle(&session).await;

    assert!(server.no_pending_link());
    assert_eq!(server.connect_requests().len(), 1);
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn calls_and_link_events_are_handled_in_arrival_order() {
    let (session, mut server) = new_session();
    let link = open(&session, &mut server, "u1").await;

    // Sent while still connected, so it must go out before the close lands.
    session.send_chat_message("42", "on my way", "driver@example.com");
    assert!(link.emit(TransportEvent::Closed {
        code: 1001,
        reason: "going away".into(),
    }));
    settle(&session).await;

    assert_eq!(server.next_frame().await["message"], "on my way");
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_not_starved_by_inbound_traffic() {
    let (session, mut server) = new_session();
    let link = open(&session, &mut server, "u1").await;
    let mut chat = session.chat_messages();

    for n in 0..50 {
        server_says(&link, json!({"type": "chat_message", "data": {"n": n}}));
    }
    let disconnect = tokio::spawn({
        let session = session.clone();
        async move { session.disconnect().await }
    });
    // Let the spawned call queue its disconnect behind the first batch.
    tokio::task::yield_now().await;
    for n in 50..100 {
        server_says(&link, json!({"type": "chat_message", "data": {"n": n}}));
    }
    disconnect.await.unwrap();

    assert_eq!(session.state(), SessionState::Disconnected);
    settle(&session).await;
    let mut received = Vec::new();
    while let Ok(update) = chat.try_recv() {
        received.push(update["n"].as_u64().unwrap());
    }
    assert_eq!(received, (0..50).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn events_from_a_superseded_link_are_ignored() {
    let (session, mut server) = new_session();
    let first = open(&session, &mut server, "u1").await;
    let mut chat = session.chat_messages();

    first.emit(TransportEvent::Failed("reset".into()));
    let second = server.next_link().await;

    first.emit(TransportEvent::Opened);
    server_says(&first, json!({"type": "chat_message", "data": {"message": "ghost"}}));
    settle(&session).await;

    assert_eq!(session.state(), SessionState::Connecting);
    assert!(chat.try_recv().is_err());

    second.emit(TransportEvent::Opened);
    session
        .watch_state()
        .wait_for(SessionState::is_connected)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn heartbeat_pings_while_connected() {
    let (session, mut server) = new_session();
    let link = open(&session, &mut server, "u1").await;
    let connected_at = Instant::now();

    assert_eq!(server.next_frame().await, json!({"type": "ping"}));
    assert!(connected_at.elapsed() >= Duration::from_secs(30));
    assert!(session.last_pong().is_none());

    server_says(&link, json!({"type": "pong"}));
    settle(&session).await;
    assert!(session.last_pong().is_some());

    assert_eq!(server.next_frame().await, json!({"type": "ping"}));
    assert!(connected_at.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn push_updates_reach_listeners_and_noise_is_harmless() {
    let (session, mut server) = new_session();
    let link = open(&session, &mut server, "u1").await;
    let mut chat = session.chat_messages();
    let mut orders = session.order_updates();
    let mut locations = session.location_updates();
    let mut notices = session.server_notices();

    server_says(&link, json!({"type": "connected", "clientId": "srv-7"}));
    server_says(&link, json!({"type": "surge_pricing", "data": {}}));
    assert!(link.emit(TransportEvent::Message("not json".into())));
    server_says(&link, json!({"type": "chat_message", "data": {"message": "hi"}}));
    server_says(&link, json!({"type": "order_update", "data": {"status": "delivered"}}));
    server_says(&link, json!({"type": "location_update", "data": {"lat": 52.1}}));
    server_says(&link, json!({"type": "error", "message": "maintenance at 2am"}));

    assert_eq!(chat.recv().await.unwrap()["message"], "hi");
    assert_eq!(orders.recv().await.unwrap()["status"], "delivered");
    assert_eq!(locations.recv().await.unwrap()["lat"], 52.1);
    assert_eq!(notices.recv().await.unwrap().message, "maintenance at 2am");
    assert_eq!(session.assigned_client_id().as_deref(), Some("srv-7"));
    assert!(session.is_connected());
}
