//! Frame command names.
//!
//! Client frames are sent by this library; server frames are dispatched by
//! the session. Any other command is passed through untouched.

pub const CONNECT: &str = "CONNECT";
pub const STOMP: &str = "STOMP";
pub const SEND: &str = "SEND";
pub const SUBSCRIBE: &str = "SUBSCRIBE";
pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
pub const ACK: &str = "ACK";
pub const NACK: &str = "NACK";
pub const BEGIN: &str = "BEGIN";
pub const COMMIT: &str = "COMMIT";
pub const ABORT: &str = "ABORT";
pub const DISCONNECT: &str = "DISCONNECT";

pub const CONNECTED: &str = "CONNECTED";
pub const MESSAGE: &str = "MESSAGE";
pub const RECEIPT: &str = "RECEIPT";
pub const ERROR: &str = "ERROR";

/// Returns true for commands whose header values are never escaped.
pub fn skips_escaping(command: &str) -> bool {
    command == CONNECT || command == CONNECTED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_commands_skip_escaping() {
        assert!(skips_escaping(CONNECT));
        assert!(skips_escaping(CONNECTED));
        assert!(!skips_escaping(SEND));
        assert!(!skips_escaping(STOMP));
    }
}
