//! DLCI roles.
//!
//! DLCI 0 is the multiplexer control channel. The cellular stack opens
//! three more: AT commands, unsolicited notifications and a raw data pipe.

use serde::{Deserialize, Serialize};

/// Multiplexer control (establishment, close-down, modem status).
pub const CONTROL: u8 = 0;

/// AT command/response traffic.
pub const COMMANDS: u8 = 1;

/// Unsolicited result codes.
pub const NOTIFICATIONS: u8 = 2;

/// PPP or other raw data.
pub const DATA: u8 = 3;

/// Highest DLCI representable in the 6-bit address field.
pub const MAX_DLCI: u8 = 63;

/// The logical channels this stack opens, in startup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    Control,
    Commands,
    Notifications,
    Data,
}

impl ChannelRole {
    /// Every role, in the order startup opens them.
    pub const ALL: [ChannelRole; 4] = [
        ChannelRole::Control,
        ChannelRole::Commands,
        ChannelRole::Notifications,
        ChannelRole::Data,
    ];

    pub const fn dlci(self) -> u8 {
        match self {
            ChannelRole::Control => CONTROL,
            ChannelRole::Commands => COMMANDS,
            ChannelRole::Notifications => NOTIFICATIONS,
            ChannelRole::Data => DATA,
        }
    }

    pub const fn from_dlci(dlci: u8) -> Option<Self> {
        match dlci {
            CONTROL => Some(ChannelRole::Control),
            COMMANDS => Some(ChannelRole::Commands),
            NOTIFICATIONS => Some(ChannelRole::Notifications),
            DATA => Some(ChannelRole::Data),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        dlci_name(self.dlci())
    }
}

impl std::fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns a human-readable name for a DLCI.
pub const fn dlci_name(dlci: u8) -> &'static str {
    match dlci {
        CONTROL => "Control",
        COMMANDS => "Commands",
        NOTIFICATIONS => "Notifications",
        DATA => "Data",
        4..=MAX_DLCI => "Unassigned",
        _ => "Invalid",
    }
}

/// Returns true if `dlci` fits the address field.
pub const fn is_valid(dlci: u8) -> bool {
    dlci <= MAX_DLCI
}
