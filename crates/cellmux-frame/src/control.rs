//! Multiplexer control messages carried in UIH frames on DLCI 0.
//!
//! Each message is a type octet (EA bit 0, C/R bit 1, type in bits 2-7),
//! one or more EA-extended length octets, then the value octets.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{CR, EA};
use crate::error::{FrameError, Result};

/// Message types, as the type octet with EA and C/R cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlType {
    /// DLC parameter negotiation.
    Pn,
    /// Power saving.
    Psc,
    /// Multiplexer close-down.
    Cld,
    Test,
    /// Flow control on (all channels).
    FcOn,
    /// Flow control off (all channels).
    FcOff,
    /// Modem status.
    Msc,
    /// Non-supported command response.
    Nsc,
    Other(u8),
}

impl ControlType {
    pub const fn code(self) -> u8 {
        match self {
            ControlType::Pn => 0x80,
            ControlType::Psc => 0x40,
            ControlType::Cld => 0xC0,
            ControlType::Test => 0x20,
            ControlType::FcOn => 0xA0,
            ControlType::FcOff => 0x60,
            ControlType::Msc => 0xE0,
            ControlType::Nsc => 0x10,
            ControlType::Other(code) => code & !(EA | CR),
        }
    }

    pub const fn from_code(octet: u8) -> Self {
        match octet & !(EA | CR) {
            0x80 => ControlType::Pn,
            0x40 => ControlType::Psc,
            0xC0 => ControlType::Cld,
            0x20 => ControlType::Test,
            0xA0 => ControlType::FcOn,
            0x60 => ControlType::FcOff,
            0xE0 => ControlType::Msc,
            0x10 => ControlType::Nsc,
            other => ControlType::Other(other),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ControlType::Pn => "PN",
            ControlType::Psc => "PSC",
            ControlType::Cld => "CLD",
            ControlType::Test => "TEST",
            ControlType::FcOn => "FCon",
            ControlType::FcOff => "FCoff",
            ControlType::Msc => "MSC",
            ControlType::Nsc => "NSC",
            ControlType::Other(_) => "unknown",
        }
    }
}

/// V.24 signal octet of a modem status command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct V24Signals(pub u8);

impl V24Signals {
    /// Flow control: sender is unable to accept frames.
    pub const FC: u8 = 0x02;
    /// Ready to communicate.
    pub const RTC: u8 = 0x04;
    /// Ready to receive.
    pub const RTR: u8 = 0x08;
    /// Incoming call.
    pub const IC: u8 = 0x40;
    /// Data valid.
    pub const DV: u8 = 0x80;

    pub const fn flow_control(self) -> bool {
        self.0 & Self::FC != 0
    }

    pub const fn ready_to_communicate(self) -> bool {
        self.0 & Self::RTC != 0
    }

    pub const fn ready_to_receive(self) -> bool {
        self.0 & Self::RTR != 0
    }

    pub const fn incoming_call(self) -> bool {
        self.0 & Self::IC != 0
    }

    pub const fn data_valid(self) -> bool {
        self.0 & Self::DV != 0
    }
}

/// Value of an MSC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModemStatus {
    pub dlci: u8,
    pub signals: V24Signals,
}

impl ModemStatus {
    pub fn decode(value: &[u8]) -> Result<Self> {
        match value {
            [address, signals, ..] => Ok(Self {
                dlci: address >> 2,
                signals: V24Signals(*signals),
            }),
            _ => Err(FrameError::MalformedControl("MSC value shorter than 2 octets")),
        }
    }

    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&[(self.dlci << 2) | CR | EA, self.signals.0 | EA])
    }
}

/// One control-channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub kind: ControlType,
    /// C/R bit of the type octet.
    pub command: bool,
    pub value: Bytes,
}

impl ControlMessage {
    pub fn command(kind: ControlType, value: impl Into<Bytes>) -> Self {
        Self {
            kind,
            command: true,
            value: value.into(),
        }
    }

    pub fn response(kind: ControlType, value: impl Into<Bytes>) -> Self {
        Self {
            kind,
            command: false,
            value: value.into(),
        }
    }

    /// Multiplexer close-down command.
    pub fn close_down() -> Self {
        Self::command(ControlType::Cld, Bytes::new())
    }

    /// The same message answered: C/R cleared, value kept.
    pub fn to_response(&self) -> Self {
        Self::response(self.kind, self.value.clone())
    }

    /// Non-supported command response naming this message's type octet.
    pub fn not_supported(&self) -> Self {
        Self::response(ControlType::Nsc, vec![self.type_octet()])
    }

    pub fn type_octet(&self) -> u8 {
        self.kind.code() | if self.command { CR } else { 0 } | EA
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(3 + self.value.len());
        dst.put_u8(self.type_octet());
        let mut len = self.value.len();
        loop {
            let septet = ((len & 0x7F) as u8) << 1;
            len >>= 7;
            if len == 0 {
                dst.put_u8(septet | EA);
                break;
            }
            dst.put_u8(septet);
        }
        dst.put_slice(&self.value);
        dst.freeze()
    }

    /// Parse one message from the front of `src`.
    ///
    /// Returns the message and the number of octets consumed.
    pub fn decode(src: &[u8]) -> Result<(Self, usize)> {
        let (&type_octet, rest) = src
            .split_first()
            .ok_or(FrameError::MalformedControl("empty control message"))?;

        let mut len = 0usize;
        let mut shift = 0u32;
        let mut consumed = 1usize;
        loop {
            let octet = *rest
                .get(consumed - 1)
                .ok_or(FrameError::MalformedControl("truncated length"))?;
            consumed += 1;
            len |= usize::from(octet >> 1) << shift;
            if octet & EA != 0 {
                break;
            }
            shift += 7;
            if shift > 14 {
                return Err(FrameError::MalformedControl("length field too long"));
            }
        }

        let value = src
            .get(consumed..consumed + len)
            .ok_or(FrameError::MalformedControl("value shorter than declared length"))?;
        Ok((
            Self {
                kind: ControlType::from_code(type_octet),
                command: type_octet & CR != 0,
                value: Bytes::copy_from_slice(value),
            },
            consumed + len,
        ))
    }

    /// Parse every message in a UIH payload.
    pub fn decode_all(mut src: &[u8]) -> Result<Vec<Self>> {
        let mut out = Vec::new();
        while !src.is_empty() {
            let (message, used) = Self::decode(src)?;
            out.push(message);
            src = &src[used..];
        }
        Ok(out)
    }

    /// Modem status carried by an MSC message.
    pub fn modem_status(&self) -> Result<ModemStatus> {
        if self.kind != ControlType::Msc {
            return Err(FrameError::MalformedControl("not an MSC message"));
        }
        ModemStatus::decode(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_down_payload_is_bit_exact() {
        assert_eq!(ControlMessage::close_down().encode().as_ref(), &[0xC3, 0x01]);
    }

    #[test]
    fn msc_from_modem_decodes() {
        // MSC command for DLCI 1 with RTC, RTR and DV set.
        let payload = [0xE3, 0x05, 0x07, 0x8D];
        let (msg, used) = ControlMessage::decode(&payload).unwrap();
        assert_eq!(used, 4);
        assert_eq!(msg.kind, ControlType::Msc);
        assert!(msg.command);

        let status = msg.modem_status().unwrap();
        assert_eq!(status.dlci, 1);
        assert!(status.signals.ready_to_communicate());
        assert!(status.signals.ready_to_receive());
        assert!(status.signals.data_valid());
        assert!(!status.signals.flow_control());
        assert!(!status.signals.incoming_call());
    }

    #[test]
    fn response_clears_cr_and_keeps_value() {
        let (msg, _) = ControlMessage::decode(&[0xE3, 0x05, 0x07, 0x0D]).unwrap();
        let reply = msg.to_response().encode();
        assert_eq!(reply.as_ref(), &[0xE1, 0x05, 0x07, 0x0D]);
    }

    #[test]
    fn unknown_type_gets_nsc() {
        let (msg, _) = ControlMessage::decode(&[0x93, 0x01]).unwrap();
        assert_eq!(msg.kind, ControlType::Other(0x90));
        assert_eq!(msg.not_supported().encode().as_ref(), &[0x11, 0x03, 0x93]);
    }

    #[test]
    fn long_value_uses_extended_length() {
        let msg = ControlMessage::command(ControlType::Test, vec![0x55; 200]);
        let wire = msg.encode();
        // 200 = 0b1_1001000: low septet first without EA, then 1 with EA.
        assert_eq!(&wire[..3], &[0x23, 0x90, 0x03]);
        let (back, used) = ControlMessage::decode(&wire).unwrap();
        assert_eq!(used, wire.len());
        assert_eq!(back, msg);
    }

    #[test]
    fn several_messages_in_one_payload() {
        let mut payload = ControlMessage::command(ControlType::FcOff, Bytes::new())
            .encode()
            .to_vec();
        payload.extend_from_slice(&ControlMessage::command(ControlType::FcOn, Bytes::new()).encode());
        let all = ControlMessage::decode_all(&payload).unwrap();
        let kinds: Vec<_> = all.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![ControlType::FcOff, ControlType::FcOn]);
    }

    #[test]
    fn truncated_messages_are_rejected() {
        assert!(ControlMessage::decode(&[]).is_err());
        assert!(ControlMessage::decode(&[0xE3]).is_err());
        assert!(ControlMessage::decode(&[0xE3, 0x05, 0x07]).is_err());
        assert!(ModemStatus::decode(&[0x07]).is_err());
    }

    #[test]
    fn modem_status_encodes_with_ea() {
        let status = ModemStatus {
            dlci: 2,
            signals: V24Signals(V24Signals::RTC | V24Signals::RTR),
        };
        assert_eq!(status.encode().as_ref(), &[0x0B, 0x0D]);
    }
}
