use cellmux_transport::TransportError;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Nothing to decode.
    #[error("empty frame")]
    Empty,

    /// Missing or misplaced flag, or fewer bytes than the header declares.
    #[error("incorrect leading/trailing flags or truncated frame")]
    BadFlags,

    /// FCS mismatch on a frame that is not exempt from checking.
    #[error("frame check sequence mismatch (received 0x{fcs:02X})")]
    Checksum { fcs: u8 },

    /// The payload exceeds the 15-bit length field or the negotiated frame size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// DLCI outside 0..=63.
    #[error("invalid DLCI {0}")]
    InvalidDlci(u8),

    /// A control-channel message could not be parsed.
    #[error("malformed control message: {0}")]
    MalformedControl(&'static str),

    /// Writing an encoded frame failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, FrameError>;
