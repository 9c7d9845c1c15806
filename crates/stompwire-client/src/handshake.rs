//! CONNECT / CONNECTED exchange.

use std::fmt;

use stompwire_frame::{command, Frame, Headers, Version};
use tracing::warn;

use crate::config::ClientConfig;
use crate::heartbeat::{negotiate, Heartbeat, Negotiated};

pub const ACCEPT_VERSION: &str = "accept-version";
pub const HEART_BEAT: &str = "heart-beat";
pub const VERSION: &str = "version";
pub const SERVER: &str = "server";

const SECRET_HEADERS: &[&str] = &["passcode"];

/// What the broker agreed to in CONNECTED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedInfo {
    /// Negotiated version; 1.0 when the broker sent none.
    pub version: Version,
    /// The broker's `server` header, if any.
    pub server: Option<String>,
    /// Heart-beat timers to run. Empty below 1.1.
    pub heartbeat: Negotiated,
}

/// Build the CONNECT frame for a new session.
///
/// `accept-version` and `heart-beat` are always set from configuration and
/// override same-named entries in `connect_headers`.
pub fn connect_frame(config: &ClientConfig) -> Frame {
    let mut headers = config.connect_headers.clone();
    headers.insert(ACCEPT_VERSION, config.stomp_versions.supported_versions());
    headers.insert(HEART_BEAT, config.heartbeat().to_header());

    Frame {
        command: command::CONNECT.to_string(),
        headers,
        ..Frame::default()
    }
}

/// Interpret a CONNECTED frame against the local heart-beat declaration.
pub fn read_connected(frame: &Frame, local: Heartbeat) -> ConnectedInfo {
    let version = match frame.header(VERSION) {
        None => Version::V1_0,
        Some(raw) => raw.parse().unwrap_or_else(|err| {
            warn!(error = %err, "broker sent an unknown version, assuming 1.0");
            Version::V1_0
        }),
    };

    let heartbeat = match frame.header(HEART_BEAT) {
        Some(value) if version.supports_heartbeat() => negotiate(local, value),
        _ => Negotiated::default(),
    };

    ConnectedInfo {
        version,
        server: frame.header(SERVER).map(str::to_string),
        heartbeat,
    }
}

/// Headers formatted for logs with credentials redacted.
pub struct Redacted<'a>(pub &'a Headers);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if SECRET_HEADERS.contains(&key) {
                write!(f, "{key}:<redacted:{} bytes>", value.len())?;
            } else {
                write!(f, "{key}:{value}")?;
            }
        }
        Ok(())
    }
}
