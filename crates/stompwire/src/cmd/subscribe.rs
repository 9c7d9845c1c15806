use stompwire_client::{DeactivateOptions, Message};
use stompwire_frame::Headers;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cmd::send::{build_client, Progress};
use crate::cmd::{client_config, AckMode, ConnectArgs, SubscribeArgs};
use crate::exit::{client_error, io_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub async fn run(args: SubscribeArgs, connect: &ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    let config = client_config(&args.url, connect)?;
    let (tx, mut progress) = mpsc::unbounded_channel();
    let client = build_client(config, tx)?;
    client
        .activate()
        .map_err(|err| client_error("activate failed", err))?;

    let (message_tx, mut messages) = mpsc::unbounded_channel::<Message>();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut printed = 0usize;
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.map_err(|err| io_error("signal handler setup failed", err))?;
                info!("interrupted");
                break;
            }
            Some(event) = progress.recv() => match event {
                // Subscriptions do not survive a reconnect; renew them on
                // every CONNECTED.
                Progress::Connected => {
                    let deliver = message_tx.clone();
                    let headers = Headers::new().with("ack", args.ack.header_value());
                    let subscribed = client.subscribe(
                        &args.destination,
                        move |message| {
                            let _ = deliver.send(message);
                        },
                        headers,
                    );
                    match subscribed {
                        Ok(subscription) => {
                            info!(destination = %args.destination, id = subscription.id(), "subscribed");
                        }
                        // Lost again before the request went out; the next
                        // CONNECTED retries.
                        Err(err) => warn!(error = %err, "subscribe failed"),
                    }
                }
                Progress::StompError(message) => warn!(%message, "broker error"),
                Progress::SocketError(message) => warn!(%message, "connection error"),
                Progress::Closed(code) => warn!(code, "connection closed, retrying"),
                Progress::Receipt => {}
            },
            Some(message) = messages.recv() => {
                print_message(&message, format);
                if args.ack != AckMode::Auto {
                    message
                        .ack(Headers::new())
                        .map_err(|err| client_error("ack failed", err))?;
                }
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
        }
    }

    client
        .deactivate(DeactivateOptions::default())
        .await
        .map_err(|err| client_error("disconnect failed", err))?;
    Ok(SUCCESS)
}
