use std::time::Duration;

use cellmux_frame::FrameError;
use cellmux_transport::TransportError;

use crate::controller::Mode;

/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Bad flags, truncation or an unparseable control message.
    #[error("framing error: {0}")]
    Framing(FrameError),

    /// FCS mismatch on a frame that is not exempt from checking.
    #[error("frame checksum mismatch (received 0x{fcs:02X})")]
    Checksum { fcs: u8 },

    /// The establishment handshake exhausted its retries.
    #[error("DLCI {dlci} not established after {attempts} attempts")]
    EstablishTimeout { dlci: u8, attempts: u32 },

    /// No complete response within the deadline.
    #[error("no response to {command:?} within {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    /// An inbound frame was dropped because nobody drained the buffer.
    #[error("response buffer full on DLCI {dlci}")]
    ResponseBufferFull { dlci: u8 },

    /// I/O failure on the link. Fatal to the session.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The modem rejected a configuration command.
    #[error("modem rejected {command:?}: {response}")]
    NegotiationFailure { command: String, response: String },

    /// The full baud/CMUX sweep found no answering modem.
    #[error("no baud rate found for modem")]
    BaudNotFound,

    /// The modem must be power-cycled before it can be used.
    #[error("modem needs reset")]
    ModemNeedsReset,

    /// The channel was closed while the call was in progress.
    #[error("DLCI {0} closed")]
    ChannelClosed(u8),

    /// The channel is not established.
    #[error("DLCI {0} is not open")]
    ChannelNotOpen(u8),

    /// The modem has withdrawn ready-to-communicate on this channel.
    #[error("sending blocked on DLCI {0}")]
    SendingBlocked(u8),

    /// The operation is not valid in the current mode.
    #[error("invalid mode: expected {expected}, controller is {actual}")]
    InvalidMode { expected: Mode, actual: Mode },

    /// Configuration could not be used.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local I/O error outside the link (config file, thread spawn).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for MuxError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Transport(err) => MuxError::Transport(err),
            FrameError::Checksum { fcs } => MuxError::Checksum { fcs },
            other => MuxError::Framing(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;

/// Coarse outcome of a bring-up step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ConfState {
    Success,
    Failure,
    ModemNeedsReset,
}

impl<T> From<&Result<T>> for ConfState {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ConfState::Success,
            Err(MuxError::ModemNeedsReset) => ConfState::ModemNeedsReset,
            Err(_) => ConfState::Failure,
        }
    }
}
