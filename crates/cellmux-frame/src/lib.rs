//! GSM 07.10 basic-option framing for a multiplexed modem link.
//!
//! Every frame on the wire is:
//! - an opening `0xF9` flag
//! - address (DLCI, C/R, EA), control (frame type, P/F) and a 1-2 octet length
//! - the payload, an 8-bit FCS and a closing flag
//!
//! [`Demuxer`] cuts frames out of the raw receive stream; [`FrameWriter`]
//! encodes and chunks outgoing data. Control-channel messages (MSC, CLD,
//! TEST, ...) live in [`control`].

pub mod channel;
pub mod codec;
pub mod control;
pub mod demux;
pub mod dump;
pub mod error;
pub mod writer;

pub use channel::{dlci_name, ChannelRole, COMMANDS, CONTROL, DATA, NOTIFICATIONS};
pub use codec::{
    decode, decode_frame, encode_frame, is_complete, is_complete_with, Compat, Frame, FrameStatus,
    FrameType, DEFAULT_MAX_FRAME_SIZE, FLAG, MAX_PAYLOAD,
};
pub use control::{ControlMessage, ControlType, ModemStatus, V24Signals};
pub use demux::{DemuxStats, Demuxer};
pub use dump::{hex_dump, parse_hex};
pub use error::{FrameError, Result};
pub use writer::{split_payload, FrameWriter};
