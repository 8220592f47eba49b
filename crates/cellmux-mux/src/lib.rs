//! GSM 07.10 multiplexer control for cellular modems.
//!
//! [`MuxController`] brings a modem from an unknown line state to four
//! established channels over one serial link:
//!
//! 1. [`MuxController::baud_detect`] finds the speed the modem answers on
//! 2. [`MuxController::configure`] runs the AT bring-up sequence
//! 3. [`MuxController::start_multiplexer`] sends `AT+CMUX` and establishes
//!    Control, Commands, Notifications and Data, all or nothing
//!
//! Each [`DlcChannel`] offers blocking AT commands with a deadline, raw
//! data writes, and an async callback for unsolicited traffic such as URCs.

pub mod at;
pub mod config;
mod control;
pub mod controller;
pub mod dlc;
pub mod emulator;
pub mod error;
pub mod response;

pub use at::{AtCollector, AtOutcome, AtResponse, SignalStrength, PROMPT};
pub use config::{ChannelParameters, Compat, ModemCommands, MuxConfig, MuxParameters, PortSpeed};
pub use controller::{ChannelInfo, Mode, MuxController, FALLBACK_BAUD};
pub use dlc::{AsyncCallback, ChannelStats, DlcChannel, DlcState};
pub use emulator::{urc_frame, EmulatorOptions, ModemEmulator};
pub use error::{ConfState, MuxError, Result};
pub use response::{AwaitGuard, Offer, ResponseBuffer, WaitError};
