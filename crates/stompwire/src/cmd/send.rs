use std::time::Duration;

use stompwire_client::{Client, DeactivateOptions, PublishParams};
use stompwire_frame::Body;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::cmd::{client_config, parse_duration, ConnectArgs, SendArgs};
use crate::exit::{client_error, io_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, TRANSPORT_ERROR};
use crate::output::{print_sent, OutputFormat};

/// What the callbacks report back to the command.
#[derive(Debug)]
pub(crate) enum Progress {
    Connected,
    Receipt,
    StompError(String),
    SocketError(String),
    Closed(u16),
}

pub async fn run(args: SendArgs, connect: &ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    let limit = parse_duration(&args.timeout)?;
    let body = resolve_body(&args)?;

    let mut config = client_config(&args.url, connect)?;
    config.reconnect_delay = Duration::ZERO;
    config.connection_timeout = limit;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = build_client(config, tx.clone())?;
    client
        .activate()
        .map_err(|err| client_error("activate failed", err))?;

    wait_for(&mut rx, limit, "connect", |p| matches!(p, Progress::Connected)).await?;
    debug!(destination = %args.destination, "connected, publishing");

    let mut params = PublishParams::new(&args.destination)
        .with_headers(args.headers.iter().cloned().collect())
        .with_body(body);
    if let Some(receipt) = &args.receipt {
        let progress = tx.clone();
        client
            .watch_for_receipt(receipt, move |_| {
                let _ = progress.send(Progress::Receipt);
            })
            .map_err(|err| client_error("receipt registration failed", err))?;
        params = params.with_header("receipt", receipt);
    }
    let body_size = params.body.as_bytes().len();
    client
        .publish(params)
        .map_err(|err| client_error("send failed", err))?;

    if args.receipt.is_some() {
        wait_for(&mut rx, limit, "receipt", |p| matches!(p, Progress::Receipt)).await?;
        info!(receipt = args.receipt.as_deref(), "broker confirmed message");
    }

    let deactivate = client.deactivate(DeactivateOptions::default());
    match timeout(limit, deactivate).await {
        Ok(result) => result.map_err(|err| client_error("disconnect failed", err))?,
        Err(_) => {
            client
                .deactivate(DeactivateOptions::force())
                .await
                .map_err(|err| client_error("disconnect failed", err))?;
        }
    }

    print_sent(&args.destination, body_size, args.receipt.as_deref(), format);
    Ok(SUCCESS)
}

pub(crate) fn build_client(
    config: stompwire_client::ClientConfig,
    tx: mpsc::UnboundedSender<Progress>,
) -> CliResult<Client> {
    let on_connect = tx.clone();
    let on_error = tx.clone();
    let on_socket_error = tx.clone();
    let on_close = tx;
    Client::builder(config)
        .on_connect(move |_| {
            let _ = on_connect.send(Progress::Connected);
        })
        .on_stomp_error(move |frame| {
            let message = frame.header("message").unwrap_or(frame.body()).to_string();
            let _ = on_error.send(Progress::StompError(message));
        })
        .on_websocket_error(move |message| {
            let _ = on_socket_error.send(Progress::SocketError(message.to_string()));
        })
        .on_websocket_close(move |event| {
            let _ = on_close.send(Progress::Closed(event.code));
        })
        .build()
        .map_err(|err| client_error("client setup failed", err))
}

/// Wait until `done` matches, failing early on errors and closes.
pub(crate) async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<Progress>,
    limit: Duration,
    what: &str,
    done: impl Fn(&Progress) -> bool,
) -> CliResult<()> {
    let waiting = async {
        let mut socket_error = None;
        while let Some(progress) = rx.recv().await {
            if done(&progress) {
                return Ok(());
            }
            match progress {
                Progress::StompError(message) => {
                    return Err(CliError::new(FAILURE, format!("broker error: {message}")));
                }
                Progress::SocketError(message) => socket_error = Some(message),
                Progress::Closed(code) => {
                    let detail = socket_error
                        .take()
                        .unwrap_or_else(|| format!("connection closed (code {code})"));
                    return Err(CliError::new(
                        TRANSPORT_ERROR,
                        format!("{what} failed: {detail}"),
                    ));
                }
                Progress::Connected | Progress::Receipt => {}
            }
        }
        Err(CliError::new(FAILURE, format!("{what} failed: client stopped")))
    };
    timeout(limit, waiting)
        .await
        .map_err(|_| CliError::new(TIMEOUT, format!("timed out waiting for {what}")))?
}

fn resolve_body(args: &SendArgs) -> CliResult<Body> {
    if let Some(data) = &args.data {
        return Ok(Body::from(data.as_str()));
    }
    if let Some(path) = &args.file {
        let bytes = std::fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        return Ok(match String::from_utf8(bytes) {
            Ok(text) => Body::from(text),
            Err(err) => Body::binary(err.into_bytes()),
        });
    }
    Ok(Body::default())
}
