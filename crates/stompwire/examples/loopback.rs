//! In-process round trip: a tiny broker on the memory transport, one client
//! that subscribes, publishes, and disconnects.
//!
//! Run with:
//!   cargo run -p stompwire --example loopback --features memory

use std::collections::HashMap;
use std::time::Duration;

use stompwire::frame::{encode_frame, Frame, ParseEvent, Parser};
use stompwire::transport::memory::{self, MemoryConnection};
use stompwire::transport::SocketData;
use stompwire::{Client, ClientConfig, DeactivateOptions, Headers, PublishParams};
use tokio::sync::mpsc;

/// Answers CONNECT, routes SEND to matching subscriptions, and honours
/// receipts. Speaks 1.2 without heart-beats.
async fn run_broker(mut conn: MemoryConnection) {
    let mut parser = Parser::new();
    let mut subscriptions: HashMap<String, String> = HashMap::new();
    let mut next_message = 0u64;

    while let Some(data) = conn.recv().await {
        let mut frames = Vec::new();
        parser.parse_chunk(data.as_bytes(), false, |event| {
            if let ParseEvent::Frame(raw) = event {
                frames.push(Frame::from_raw(raw, true));
            }
        });

        for frame in frames {
            let mut replies = Vec::new();
            match frame.command.as_str() {
                "CONNECT" | "STOMP" => replies.push(
                    Frame::new("CONNECTED")
                        .with_header("version", "1.2")
                        .with_header("heart-beat", "0,0")
                        .with_header("server", "loopback/0.1"),
                ),
                "SUBSCRIBE" => {
                    if let (Some(dest), Some(id)) = (frame.header("destination"), frame.header("id")) {
                        subscriptions.insert(dest.to_string(), id.to_string());
                    }
                }
                "SEND" => {
                    let dest = frame.header("destination").unwrap_or_default();
                    if let Some(id) = subscriptions.get(dest) {
                        next_message += 1;
                        replies.push(
                            Frame::new("MESSAGE")
                                .with_header("destination", dest)
                                .with_header("subscription", id.as_str())
                                .with_header("message-id", format!("m-{next_message}"))
                                .with_body(frame.body.clone()),
                        );
                    }
                }
                _ => {}
            }
            if let Some(receipt) = frame.header("receipt") {
                replies.push(Frame::new("RECEIPT").with_header("receipt-id", receipt));
            }
            for reply in replies {
                if conn.send(SocketData::from(encode_frame(&reply, true))).is_err() {
                    return;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (connector, mut server) = memory::channel("memory://loopback");
    tokio::spawn(async move {
        while let Some(conn) = server.accept().await {
            tokio::spawn(run_broker(conn));
        }
    });

    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    let client = Client::builder(ClientConfig {
        heartbeat_incoming: Duration::ZERO,
        heartbeat_outgoing: Duration::ZERO,
        ..ClientConfig::default()
    })
    .with_connector(connector)
    .on_connect(move |frame| {
        let _ = connected_tx.send(frame.header("server").map(str::to_string));
    })
    .build()?;

    client.activate()?;
    let server_name = connected.recv().await.flatten();
    eprintln!("Connected to {}", server_name.as_deref().unwrap_or("unknown"));

    let (message_tx, mut messages) = mpsc::unbounded_channel();
    let subscription = client.subscribe(
        "/queue/greetings",
        move |message| {
            let _ = message_tx.send(message.body().to_string());
        },
        Headers::new(),
    )?;

    for greeting in ["hello", "bonjour", "hallo"] {
        client.publish(PublishParams::new("/queue/greetings").with_body(greeting))?;
    }
    for _ in 0..3 {
        if let Some(body) = messages.recv().await {
            eprintln!("Received on {}: {body}", subscription.id());
        }
    }

    subscription.unsubscribe(Headers::new())?;
    client.deactivate(DeactivateOptions::default()).await?;
    eprintln!("Disconnected");
    Ok(())
}
