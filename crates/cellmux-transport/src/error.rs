/// Errors that can occur in modem transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the serial device.
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: serialport::Error,
    },

    /// The serial driver rejected a configuration change.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested line speed is not usable on this transport.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaudRate(u32),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// True when the error ends the session rather than a single operation.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::UnsupportedBaudRate(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
