//! Multiplexed AT, URC and data sessions over one cellular modem UART.
//!
//! cellmux implements the GSM 07.10 (3GPP TS 27.010) basic-option
//! multiplexer as used by cellular modules: one serial link carries a
//! control channel plus separate channels for AT commands, unsolicited
//! result codes and data.
//!
//! # Crate Structure
//!
//! - [`transport`]: Byte link to the modem (`serialport` UART, in-memory fake)
//! - [`frame`]: Frame codec, control messages, stream demultiplexer
//! - [`mux`]: DLC channels and the multiplexer controller

/// Re-export transport types.
pub mod transport {
    pub use cellmux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use cellmux_frame::*;
}

/// Re-export controller and channel types.
pub mod mux {
    pub use cellmux_mux::*;
}
