use std::fmt;
use std::io;

use stompwire_client::ClientError;
use stompwire_frame::FrameError;
use stompwire_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidUrl(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    match err {
        ClientError::Transport(err) => transport_error(context, err),
        ClientError::Frame(err) => frame_error(context, err),
        ClientError::Io(err) => io_error(context, err),
        ClientError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        ClientError::Config(_) => CliError::new(USAGE, format!("{context}: {err}")),
        ClientError::NotConnected | ClientError::Closed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_client_errors_to_exit_codes() {
        assert_eq!(
            client_error("x", ClientError::Config("bad".into())).code,
            USAGE
        );
        assert_eq!(client_error("x", ClientError::NotConnected).code, FAILURE);
        assert_eq!(
            client_error("x", ClientError::Transport(TransportError::NotOpen)).code,
            TRANSPORT_ERROR
        );
        assert_eq!(
            client_error(
                "x",
                ClientError::Io(io::Error::new(io::ErrorKind::NotFound, "gone"))
            )
            .code,
            USAGE
        );
    }

    #[test]
    fn keeps_context_in_message() {
        let err = transport_error("connect failed", TransportError::Shutdown);
        assert_eq!(err.message, "connect failed: transport shut down");
    }
}
