use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use stompwire_client::{parse_heartbeat_header, ClientConfig};

use crate::exit::{client_error, io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod send;
pub mod subscribe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish a single message.
    Send(SendArgs),
    /// Subscribe and print received messages.
    Subscribe(SubscribeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, connect: &ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => block_on(send::run(args, connect, format)),
        Command::Subscribe(args) => block_on(subscribe::run(args, connect, format)),
        Command::Version(args) => version::run(args),
    }
}

fn block_on<F: std::future::Future<Output = CliResult<i32>>>(future: F) -> CliResult<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;
    runtime.block_on(future)
}

/// Connection options shared by every broker command.
#[derive(Args, Debug, Default)]
pub struct ConnectArgs {
    /// JSON client configuration file; flags override its values.
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,
    /// STOMP login header.
    #[arg(long, env = "STOMPWIRE_LOGIN", global = true)]
    pub login: Option<String>,
    /// STOMP passcode header.
    #[arg(long, env = "STOMPWIRE_PASSCODE", hide_env_values = true, global = true)]
    pub passcode: Option<String>,
    /// Virtual host sent in the `host` header.
    #[arg(long, global = true)]
    pub host: Option<String>,
    /// Heart-beat declaration as OUTGOING,INCOMING milliseconds.
    #[arg(long, value_name = "OUT,IN", global = true)]
    pub heartbeat: Option<String>,
    #[arg(skip)]
    pub log_raw: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Broker URL (ws:// or wss://).
    #[arg(env = "STOMPWIRE_URL")]
    pub url: String,
    /// Destination to publish to.
    #[arg(long, short = 'd')]
    pub destination: String,
    /// Text body.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the body from a file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Extra header as NAME:VALUE (repeatable).
    #[arg(long = "header", short = 'H', value_name = "NAME:VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
    /// Request a receipt and wait for it before disconnecting.
    #[arg(long)]
    pub receipt: Option<String>,
    /// Limit for connecting and for the receipt (e.g. 5s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Broker URL (ws:// or wss://).
    #[arg(env = "STOMPWIRE_URL")]
    pub url: String,
    /// Destination to subscribe to.
    #[arg(long, short = 'd')]
    pub destination: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Acknowledgement mode.
    #[arg(long, value_enum, default_value = "auto")]
    pub ack: AckMode,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum AckMode {
    Auto,
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn header_value(self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_header(input: &str) -> Result<(String, String), String> {
    match input.split_once(':') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME:VALUE, got {input:?}")),
    }
}

/// Build the client configuration: config file first, then flags.
pub fn client_config(url: &str, connect: &ConnectArgs) -> CliResult<ClientConfig> {
    let mut config = match &connect.config {
        Some(path) => ClientConfig::from_json_file(path).map_err(|err| {
            client_error(&format!("failed loading {}", path.display()), err)
        })?,
        None => ClientConfig::default(),
    };
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(CliError::new(
            USAGE,
            format!("broker url must start with ws:// or wss://: {url}"),
        ));
    }
    config.broker_url = Some(url.to_string());
    if let Some(login) = &connect.login {
        config.connect_headers.insert("login", login.as_str());
    }
    if let Some(passcode) = &connect.passcode {
        config.connect_headers.insert("passcode", passcode.as_str());
    }
    if let Some(host) = &connect.host {
        config.connect_headers.insert("host", host.as_str());
    }
    if let Some(value) = &connect.heartbeat {
        let heartbeat = parse_heartbeat_header(value)
            .ok_or_else(|| CliError::new(USAGE, format!("invalid --heartbeat value: {value}")))?;
        config.heartbeat_outgoing = heartbeat.outgoing;
        config.heartbeat_incoming = heartbeat.incoming;
    }
    config.log_raw_communication |= connect.log_raw;
    Ok(config)
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
