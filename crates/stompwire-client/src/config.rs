use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stompwire_frame::{Headers, Versions, DEFAULT_MAX_CHUNK_SIZE};

use crate::error::Result;
use crate::heartbeat::Heartbeat;

/// How outgoing heart-beats are timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickerStrategy {
    /// A tokio interval on the client's runtime.
    #[default]
    Interval,
    /// A dedicated OS thread, unaffected by a busy runtime.
    Thread,
}

/// Growth of the delay between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectMode {
    #[default]
    Linear,
    Exponential,
}

/// Client configuration.
///
/// Copied into every session at connect time; changes made through
/// `Client::update_config` apply from the next connection attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket URL used when no connector is supplied.
    pub broker_url: Option<String>,
    /// Protocol versions offered in `accept-version`.
    pub stomp_versions: Versions,
    /// Extra CONNECT headers (login, passcode, host, ...).
    pub connect_headers: Headers,
    /// Extra DISCONNECT headers.
    pub disconnect_headers: Headers,
    /// Expected interval between incoming heart-beats. Zero disables.
    #[serde(with = "duration_ms")]
    pub heartbeat_incoming: Duration,
    /// Interval between outgoing heart-beats. Zero disables.
    #[serde(with = "duration_ms")]
    pub heartbeat_outgoing: Duration,
    /// Silence longer than `interval * multiplier` counts as a lost heart-beat.
    pub heartbeat_tolerance_multiplier: u32,
    pub heartbeat_strategy: TickerStrategy,
    /// Delay before reconnecting. Zero disables reconnection.
    #[serde(with = "duration_ms")]
    pub reconnect_delay: Duration,
    /// Upper bound for exponential growth. Zero means uncapped.
    #[serde(with = "duration_ms")]
    pub max_reconnect_delay: Duration,
    pub reconnect_time_mode: ReconnectMode,
    /// Abort an attempt not connected within this window. Zero disables.
    #[serde(with = "duration_ms")]
    pub connection_timeout: Duration,
    pub split_large_frames: bool,
    pub max_websocket_chunk_size: usize,
    pub force_binary_ws_frames: bool,
    pub append_missing_null_on_incoming: bool,
    /// Discard instead of closing the socket when heart-beats are lost.
    pub discard_websocket_on_comm_failure: bool,
    /// Log full frame text at trace level.
    pub log_raw_communication: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_url: None,
            stomp_versions: Versions::default(),
            connect_headers: Headers::new(),
            disconnect_headers: Headers::new(),
            heartbeat_incoming: Duration::from_millis(10_000),
            heartbeat_outgoing: Duration::from_millis(10_000),
            heartbeat_tolerance_multiplier: 2,
            heartbeat_strategy: TickerStrategy::Interval,
            reconnect_delay: Duration::from_millis(5_000),
            max_reconnect_delay: Duration::from_secs(15 * 60),
            reconnect_time_mode: ReconnectMode::Linear,
            connection_timeout: Duration::ZERO,
            split_large_frames: false,
            max_websocket_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            force_binary_ws_frames: false,
            append_missing_null_on_incoming: false,
            discard_websocket_on_comm_failure: false,
            log_raw_communication: false,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_broker_url(mut self, url: impl Into<String>) -> Self {
        self.broker_url = Some(url.into());
        self
    }

    /// Local heart-beat pair as sent in CONNECT.
    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            outgoing: self.heartbeat_outgoing,
            incoming: self.heartbeat_incoming,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
