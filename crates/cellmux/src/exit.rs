use std::fmt;
use std::io;

use cellmux_frame::FrameError;
use cellmux_mux::MuxError;
use cellmux_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
/// The modem must be power-cycled before bring-up can succeed.
pub const MODEM_NEEDS_RESET: i32 = 40;
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
        io::ErrorKind::NotFound => USAGE,
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::UnsupportedBaudRate(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transport(err) => transport_error(context, err),
        FrameError::InvalidDlci(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Transport(err) => transport_error(context, err),
        MuxError::Framing(err) => frame_error(context, err),
        MuxError::Io(err) => io_error(context, err),
        MuxError::ModemNeedsReset => CliError::new(MODEM_NEEDS_RESET, format!("{context}: {err}")),
        MuxError::CommandTimeout { .. } | MuxError::EstablishTimeout { .. } => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        MuxError::Config(_) | MuxError::Json(_) | MuxError::InvalidMode { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        MuxError::Checksum { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn mux_errors_map_to_stable_codes() {
        assert_eq!(mux_error("x", MuxError::ModemNeedsReset).code, MODEM_NEEDS_RESET);
        assert_eq!(mux_error("x", MuxError::BaudNotFound).code, FAILURE);
        assert_eq!(
            mux_error(
                "x",
                MuxError::CommandTimeout {
                    command: "AT".into(),
                    timeout: Duration::from_secs(1)
                }
            )
            .code,
            TIMEOUT
        );
        assert_eq!(
            mux_error("x", MuxError::Transport(TransportError::Shutdown)).code,
            TRANSPORT_ERROR
        );
        assert_eq!(mux_error("x", MuxError::Config("bad".into())).code, USAGE);
    }

    #[test]
    fn message_keeps_context() {
        let err = mux_error("start failed", MuxError::BaudNotFound);
        assert_eq!(err.to_string(), "start failed: no baud rate found for modem");
    }
}
