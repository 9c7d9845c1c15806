mod common;

use std::time::Duration;

use common::{broker, recorder, test_config, Broker, Conn};
use stompwire_client::{
    ActivationState, Client, ClientBuilder, ClientConfig, DeactivateOptions, Message, PublishParams,
    TickerStrategy,
};
use stompwire_frame::{Body, Frame, Headers};
use stompwire_transport::{CloseEvent, SocketData, CLOSE_DISCARDED};
use tokio::time::Instant;

async fn connect_with(
    config: ClientConfig,
    version: &str,
    heart_beat: &str,
    customize: impl FnOnce(ClientBuilder) -> ClientBuilder,
) -> (Client, Conn, Broker) {
    let (connector, mut broker) = broker();
    let (on_connect, mut connected) = recorder::<()>();
    let builder = ClientBuilder::new(config)
        .with_connector(connector)
        .on_connect(move |_| on_connect(()));
    let client = customize(builder).build().unwrap();

    client.activate().unwrap();
    let mut conn = broker.accept().await;
    conn.handshake(version, heart_beat).await;
    connected.recv().await.unwrap();
    (client, conn, broker)
}

async fn connect(version: &str) -> (Client, Conn, Broker) {
    connect_with(test_config(), version, "0,0", |builder| builder).await
}

fn message(subscription: &str, body: &str) -> Frame {
    Frame::new("MESSAGE")
        .with_header("subscription", subscription)
        .with_header("message-id", "m-1")
        .with_header("destination", "/queue/a")
        .with_body(body)
}

#[tokio::test(start_paused = true)]
async fn subscribe_routes_messages_to_callback() {
    let (client, mut conn, _broker) = connect("1.2").await;
    let (on_message, mut messages) = recorder::<Message>();

    let subscription = client
        .subscribe("/queue/a", on_message, Headers::new().with("ack", "client"))
        .unwrap();
    assert_eq!(subscription.id(), "sub-0");

    let frame = conn.expect("SUBSCRIBE").await;
    assert_eq!(frame.header("id"), Some("sub-0"));
    assert_eq!(frame.header("destination"), Some("/queue/a"));
    assert_eq!(frame.header("ack"), Some("client"));

    conn.send_frame(&message("sub-0", "hello"));
    let received = messages.recv().await.unwrap();
    assert_eq!(received.body(), "hello");
    assert_eq!(received.subscription(), "sub-0");
    assert_eq!(received.header("destination"), Some("/queue/a"));

    subscription.unsubscribe(Headers::new()).unwrap();
    let frame = conn.expect("UNSUBSCRIBE").await;
    assert_eq!(frame.header("id"), Some("sub-0"));
}

#[tokio::test(start_paused = true)]
async fn subscribe_honours_caller_id() {
    let (client, mut conn, _broker) = connect("1.2").await;

    let subscription = client
        .subscribe("/topic/t", |_| {}, Headers::new().with("id", "mine"))
        .unwrap();
    assert_eq!(subscription.id(), "mine");
    let frame = conn.expect("SUBSCRIBE").await;
    assert_eq!(frame.header("id"), Some("mine"));

    client.unsubscribe("mine", Headers::new()).unwrap();
    assert_eq!(conn.expect("UNSUBSCRIBE").await.header("id"), Some("mine"));
}

#[tokio::test(start_paused = true)]
async fn unrouted_message_reaches_fallback() {
    let (on_unhandled, mut unhandled) = recorder::<Message>();
    let (_client, conn, _broker) = connect_with(test_config(), "1.2", "0,0", |builder| {
        builder.on_unhandled_message(on_unhandled)
    })
    .await;

    conn.send_frame(&message("nobody", "lost"));
    let received = unhandled.recv().await.unwrap();
    assert_eq!(received.subscription(), "nobody");
    assert_eq!(received.body(), "lost");
}

#[tokio::test(start_paused = true)]
async fn ack_under_1_2_uses_ack_header() {
    let (client, mut conn, _broker) = connect("1.2").await;
    let (on_message, mut messages) = recorder::<Message>();
    client.subscribe("/queue/a", on_message, Headers::new()).unwrap();
    conn.expect("SUBSCRIBE").await;

    conn.send_frame(&message("sub-0", "x").with_header("ack", "a-7"));
    let received = messages.recv().await.unwrap();
    assert_eq!(received.ack_id(), "a-7");

    received.ack(Headers::new()).unwrap();
    let ack = conn.expect("ACK").await;
    assert_eq!(ack.header("id"), Some("a-7"));
    assert_eq!(ack.header("subscription"), Some("sub-0"));
    assert_eq!(ack.header("message-id"), None);
}

#[tokio::test(start_paused = true)]
async fn ack_under_1_1_uses_message_id() {
    let (client, mut conn, _broker) = connect("1.1").await;
    let (on_message, mut messages) = recorder::<Message>();
    client.subscribe("/queue/a", on_message, Headers::new()).unwrap();
    conn.expect("SUBSCRIBE").await;

    conn.send_frame(&message("sub-0", "x").with_header("ack", "a-7"));
    let received = messages.recv().await.unwrap();
    assert_eq!(received.ack_id(), "m-1");

    received.nack(Headers::new()).unwrap();
    let nack = conn.expect("NACK").await;
    assert_eq!(nack.header("message-id"), Some("m-1"));
    assert_eq!(nack.header("subscription"), Some("sub-0"));
    assert_eq!(nack.header("id"), None);

    client
        .ack("m-9", "sub-0", Headers::new().with("transaction", "tx-a"))
        .unwrap();
    let ack = conn.expect("ACK").await;
    assert_eq!(ack.header("message-id"), Some("m-9"));
    assert_eq!(ack.header("transaction"), Some("tx-a"));
}

#[tokio::test(start_paused = true)]
async fn panicking_callback_does_not_stop_delivery() {
    let (client, mut conn, _broker) = connect("1.2").await;
    let (on_message, mut messages) = recorder::<String>();
    client
        .subscribe(
            "/queue/a",
            move |message: Message| {
                if message.body() == "boom" {
                    panic!("handler failure");
                }
                on_message(message.body().to_string());
            },
            Headers::new(),
        )
        .unwrap();
    conn.expect("SUBSCRIBE").await;

    conn.send_frame(&message("sub-0", "boom"));
    conn.send_frame(&message("sub-0", "fine"));
    assert_eq!(messages.recv().await.unwrap(), "fine");
    assert!(client.connected());
}

#[tokio::test(start_paused = true)]
async fn receipt_watchers_fire_once() {
    let (on_unhandled, mut unhandled) = recorder::<Frame>();
    let (client, mut conn, _broker) = connect_with(test_config(), "1.2", "0,0", |builder| {
        builder.on_unhandled_receipt(move |frame| on_unhandled(frame.clone()))
    })
    .await;
    let (on_receipt, mut receipts) = recorder::<Frame>();

    client
        .watch_for_receipt("r-1", move |frame| on_receipt(frame.clone()))
        .unwrap();
    client
        .publish(PublishParams::new("/queue/a").with_header("receipt", "r-1"))
        .unwrap();
    let send = conn.expect("SEND").await;
    assert_eq!(send.header("receipt"), Some("r-1"));

    let receipt = Frame::new("RECEIPT").with_header("receipt-id", "r-1");
    conn.send_frame(&receipt);
    conn.send_frame(&receipt);

    assert_eq!(receipts.recv().await.unwrap().header("receipt-id"), Some("r-1"));
    assert_eq!(unhandled.recv().await.unwrap().header("receipt-id"), Some("r-1"));
    assert!(receipts.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn error_and_unknown_frames_are_reported() {
    let (on_error, mut errors) = recorder::<Frame>();
    let (on_frame, mut frames) = recorder::<Frame>();
    let (client, conn, _broker) = connect_with(test_config(), "1.2", "0,0", |builder| {
        builder
            .on_stomp_error(move |frame| on_error(frame.clone()))
            .on_unhandled_frame(move |frame| on_frame(frame.clone()))
    })
    .await;

    conn.send_frame(
        &Frame::new("ERROR")
            .with_header("message", "bad destination")
            .with_body("details"),
    );
    conn.send_frame(&Frame::new("PONG"));

    let error = errors.recv().await.unwrap();
    assert_eq!(error.header("message"), Some("bad destination"));
    assert_eq!(error.body(), "details");
    assert_eq!(frames.recv().await.unwrap().command, "PONG");
    // Broker errors are not fatal to the session.
    assert!(client.connected());
}

#[tokio::test(start_paused = true)]
async fn transactions_send_begin_commit_abort() {
    let (client, mut conn, _broker) = connect("1.2").await;

    let tx = client.begin(None).unwrap();
    assert_eq!(tx.id(), "tx-0");
    assert_eq!(conn.expect("BEGIN").await.header("transaction"), Some("tx-0"));

    client
        .publish(PublishParams::new("/queue/a").with_header("transaction", tx.id()))
        .unwrap();
    assert_eq!(conn.expect("SEND").await.header("transaction"), Some("tx-0"));

    tx.commit().unwrap();
    assert_eq!(conn.expect("COMMIT").await.header("transaction"), Some("tx-0"));

    let named = client.begin(Some("batch-7")).unwrap();
    assert_eq!(conn.expect("BEGIN").await.header("transaction"), Some("batch-7"));
    named.abort().unwrap();
    assert_eq!(conn.expect("ABORT").await.header("transaction"), Some("batch-7"));

    client.commit("other").unwrap();
    assert_eq!(conn.expect("COMMIT").await.header("transaction"), Some("other"));
}

#[tokio::test(start_paused = true)]
async fn publish_builds_send_frame() {
    let (client, mut conn, _broker) = connect("1.2").await;

    client
        .publish(
            PublishParams::new("/topic/x")
                .with_header("priority", "9")
                .with_body("héllo"),
        )
        .unwrap();
    let send = conn.expect("SEND").await;
    assert_eq!(send.headers.iter().next(), Some(("destination", "/topic/x")));
    assert_eq!(send.header("priority"), Some("9"));
    assert_eq!(send.header("content-length"), Some("6"));
    assert_eq!(send.body(), "héllo");

    client
        .publish(
            PublishParams::new("/topic/x")
                .with_header("destination", "/topic/y")
                .with_body("plain")
                .with_skip_content_length_header(true),
        )
        .unwrap();
    let send = conn.expect("SEND").await;
    assert_eq!(send.header("destination"), Some("/topic/y"));
    assert_eq!(send.header("content-length"), None);

    client
        .publish(PublishParams::new("/topic/bin").with_body(Body::binary(vec![0u8, 1, 2, 0])))
        .unwrap();
    let send = conn.expect("SEND").await;
    assert_eq!(send.header("content-length"), Some("4"));
    assert_eq!(send.binary_body(), &[0u8, 1, 2, 0][..]);
}

#[tokio::test(start_paused = true)]
async fn header_escaping_follows_negotiated_version() {
    let (client, mut conn, _broker) = connect("1.2").await;
    let (on_message, mut messages) = recorder::<Message>();
    client.subscribe("/queue/a", on_message, Headers::new()).unwrap();
    conn.expect("SUBSCRIBE").await;

    client
        .publish(PublishParams::new("/queue/a").with_header("note", "a:b\nc"))
        .unwrap();
    let raw = conn.recv_raw().await.unwrap();
    let text = String::from_utf8_lossy(raw.as_bytes()).into_owned();
    assert!(text.contains("note:a\\cb\\nc\n"), "raw frame: {text:?}");

    // The broker side escapes too; the client sees the original value.
    conn.send_frame(&message("sub-0", "x").with_header("note", "x:y"));
    assert_eq!(messages.recv().await.unwrap().header("note"), Some("x:y"));
}

#[tokio::test(start_paused = true)]
async fn no_escaping_under_1_1() {
    let (client, mut conn, _broker) = connect("1.1").await;
    let (on_message, mut messages) = recorder::<Message>();
    client.subscribe("/queue/a", on_message, Headers::new()).unwrap();
    conn.expect("SUBSCRIBE").await;

    client
        .publish(PublishParams::new("/queue/a").with_header("note", "a:b"))
        .unwrap();
    let raw = conn.recv_raw().await.unwrap();
    let text = String::from_utf8_lossy(raw.as_bytes()).into_owned();
    assert!(text.contains("note:a:b\n"), "raw frame: {text:?}");

    conn.send_frame(&message("sub-0", "x").with_header("note", "x\\cy"));
    assert_eq!(messages.recv().await.unwrap().header("note"), Some("x\\cy"));
}

#[tokio::test(start_paused = true)]
async fn connected_without_version_means_1_0() {
    let config = ClientConfig {
        heartbeat_incoming: Duration::from_millis(1000),
        heartbeat_outgoing: Duration::from_millis(1000),
        ..test_config()
    };
    let (client, mut conn, _broker) = connect_with(config, "", "1000,1000", |builder| builder).await;
    let (on_message, mut messages) = recorder::<Message>();
    client.subscribe("/queue/a", on_message, Headers::new()).unwrap();
    conn.expect("SUBSCRIBE").await;

    // No heart-beats in 1.0, in either direction.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(client.connected());

    conn.send_frame(&message("sub-0", "x").with_header("ack", "a-1"));
    let received = messages.recv().await.unwrap();
    received.ack(Headers::new()).unwrap();
    let ack = conn.expect("ACK").await;
    assert_eq!(ack.header("message-id"), Some("m-1"));
    assert_eq!(conn.heartbeats, 0);
}

#[tokio::test(start_paused = true)]
async fn outgoing_heartbeats_use_slower_rate() {
    let config = ClientConfig {
        heartbeat_outgoing: Duration::from_millis(1000),
        ..test_config()
    };
    let (connector, mut broker) = broker();
    let client = ClientBuilder::new(config)
        .with_connector(connector)
        .build()
        .unwrap();

    client.activate().unwrap();
    let mut conn = broker.accept().await;
    let connect = conn.handshake("1.2", "0,2000").await;
    assert_eq!(connect.header("heart-beat"), Some("1000,0"));
    let connected_at = Instant::now();

    assert_eq!(conn.recv_raw().await, Some(SocketData::Text("\n".to_string())));
    let elapsed = connected_at.elapsed();
    assert!(
        elapsed >= Duration::from_millis(2000) && elapsed < Duration::from_millis(2010),
        "first ping after {elapsed:?}"
    );
    assert_eq!(conn.recv_raw().await, Some(SocketData::Text("\n".to_string())));
}

#[tokio::test(start_paused = true)]
async fn incoming_heartbeats_keep_connection_alive() {
    let config = ClientConfig {
        heartbeat_incoming: Duration::from_millis(1000),
        ..test_config()
    };
    let (on_ping, mut pings) = recorder::<()>();
    let (on_lost, mut lost) = recorder::<()>();
    let (client, conn, _broker) = connect_with(config, "1.2", "1000,0", |builder| {
        builder
            .on_heartbeat_received(move || on_ping(()))
            .on_heartbeat_lost(move || on_lost(()))
    })
    .await;

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        conn.send_raw("\n");
        pings.recv().await.unwrap();
    }
    assert!(client.connected());
    assert!(lost.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn silent_broker_is_detected() {
    let config = ClientConfig {
        heartbeat_incoming: Duration::from_millis(1000),
        ..test_config()
    };
    let (on_lost, mut lost) = recorder::<()>();
    let (client, mut conn, _broker) = connect_with(config, "1.2", "1000,0", |builder| {
        builder.on_heartbeat_lost(move || on_lost(()))
    })
    .await;
    let connected_at = Instant::now();

    lost.recv().await.unwrap();
    // Ticks at 1s, 2s, 3s; only the 3s tick exceeds 2 x 1000ms.
    let elapsed = connected_at.elapsed();
    assert!(
        elapsed >= Duration::from_millis(3000) && elapsed < Duration::from_millis(3010),
        "lost after {elapsed:?}"
    );
    assert!(conn.next_frame().await.is_none());
    assert!(client.active());
}

#[tokio::test(start_paused = true)]
async fn comm_failure_can_discard_socket() {
    let config = ClientConfig {
        heartbeat_incoming: Duration::from_millis(1000),
        discard_websocket_on_comm_failure: true,
        ..test_config()
    };
    let (on_close, mut closes) = recorder::<CloseEvent>();
    let (_client, _conn, _broker) = connect_with(config, "1.2", "1000,0", |builder| {
        builder.on_websocket_close(move |event| on_close(event.clone()))
    })
    .await;

    assert_eq!(closes.recv().await.unwrap().code, CLOSE_DISCARDED);
}

#[tokio::test(start_paused = true)]
async fn large_frames_are_split_across_sends() {
    let config = ClientConfig {
        split_large_frames: true,
        max_websocket_chunk_size: 100,
        ..test_config()
    };
    let (client, mut conn, _broker) = connect_with(config, "1.2", "0,0", |builder| builder).await;

    let body = "a".repeat(250);
    let before = conn.sends;
    client
        .publish(PublishParams::new("/queue/big").with_body(body.clone()))
        .unwrap();
    let send = conn.expect("SEND").await;
    assert_eq!(send.body(), body);
    assert!(conn.sends - before >= 3, "sends: {}", conn.sends - before);
}

#[tokio::test(start_paused = true)]
async fn forced_binary_frames() {
    let config = ClientConfig {
        force_binary_ws_frames: true,
        ..test_config()
    };
    let (client, mut conn, _broker) = connect_with(config, "1.2", "0,0", |builder| builder).await;

    client
        .publish(PublishParams::new("/queue/a").with_body("text"))
        .unwrap();
    let send = conn.expect("SEND").await;
    assert_eq!(send.body(), "text");
    assert_eq!(conn.binary_sends, conn.sends);
}

#[tokio::test(start_paused = true)]
async fn missing_null_can_be_appended() {
    let config = ClientConfig {
        append_missing_null_on_incoming: true,
        ..test_config()
    };
    let (client, mut conn, _broker) = connect_with(config, "1.2", "0,0", |builder| builder).await;
    let (on_message, mut messages) = recorder::<Message>();
    client.subscribe("/queue/a", on_message, Headers::new()).unwrap();
    conn.expect("SUBSCRIBE").await;

    conn.send_raw("MESSAGE\nsubscription:sub-0\nmessage-id:9\n\nno terminator");
    assert_eq!(messages.recv().await.unwrap().body(), "no terminator");
}

#[tokio::test(start_paused = true)]
async fn oversized_content_length_leaves_client_usable() {
    let (client, mut conn, _broker) = connect("1.2").await;

    conn.send_raw("MESSAGE\nsubscription:sub-0\ncontent-length:18446744073709551615\n\nx");
    client
        .publish(PublishParams::new("/queue/a").with_body("still here"))
        .unwrap();
    assert_eq!(conn.expect("SEND").await.body(), "still here");
    assert!(client.connected());

    let deactivation = client.deactivate(DeactivateOptions::default());
    conn.expect("DISCONNECT").await;
    conn.close();
    deactivation.await.unwrap();
    assert_eq!(client.state(), ActivationState::Inactive);
}

#[tokio::test(start_paused = true)]
async fn ack_from_earlier_connection_is_dropped() {
    let (client, mut conn, mut broker) = connect("1.2").await;
    let (on_message, mut messages) = recorder::<Message>();
    client.subscribe("/queue/a", on_message, Headers::new()).unwrap();
    conn.expect("SUBSCRIBE").await;
    conn.send_frame(&message("sub-0", "x").with_header("ack", "a-1"));
    let stale = messages.recv().await.unwrap();

    conn.close();
    let mut conn = broker.accept().await;
    conn.handshake("1.2", "0,0").await;
    while !client.connected() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    stale.ack(Headers::new()).unwrap();
    client
        .publish(PublishParams::new("/queue/a").with_body("after"))
        .unwrap();
    let next = conn.next_frame().await.unwrap();
    assert_eq!(next.command, "SEND", "stale ack leaked: {next:?}");
}

// A paused clock does not drive the ticker thread, so this one runs in
// real time with short periods.
#[tokio::test]
async fn thread_ticker_sends_outgoing_heartbeats() {
    let config = ClientConfig {
        heartbeat_outgoing: Duration::from_millis(100),
        heartbeat_strategy: TickerStrategy::Thread,
        ..test_config()
    };
    let (connector, mut broker) = broker();
    let client = ClientBuilder::new(config)
        .with_connector(connector)
        .build()
        .unwrap();

    client.activate().unwrap();
    let mut conn = broker.accept().await;
    let connect = conn.handshake("1.2", "0,200").await;
    assert_eq!(connect.header("heart-beat"), Some("100,0"));
    let connected_at = Instant::now();

    for _ in 0..2 {
        let ping = tokio::time::timeout(Duration::from_secs(5), conn.recv_raw())
            .await
            .expect("no heart-beat from the ticker thread");
        assert_eq!(ping, Some(SocketData::Text("\n".to_string())));
    }
    assert!(connected_at.elapsed() >= Duration::from_millis(390));
}
