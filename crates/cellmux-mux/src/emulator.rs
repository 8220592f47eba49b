//! A scripted modem that speaks plain AT and basic-option CMUX.
//!
//! [`ModemEmulator`] turns into a [`FakeModem`] whose responder answers
//! like a compliant cellular module: `OK` to the bring-up commands, `UA`
//! to `SABM`, an MSC after each established channel, and a return to plain
//! mode on close-down. Integration tests and the CLI `--fake` mode run
//! against it.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use cellmux_frame::{
    ChannelRole, Compat, ControlMessage, ControlType, Demuxer, Frame, FrameType, ModemStatus,
    V24Signals, CONTROL, DEFAULT_MAX_FRAME_SIZE,
};
use cellmux_transport::{FakeModem, WriteEvent};
use tracing::{debug, trace};

use crate::config::PortSpeed;

/// Behavior switches for the emulated modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorOptions {
    /// Line speed the modem listens on until `AT+CMUX` changes it.
    pub baud: u32,
    /// Begin in CMUX mode, as after a host crash.
    pub start_multiplexed: bool,
    /// Echo commands until `ATE0`.
    pub echo: bool,
    /// Number of SABMs to ignore per DLCI before answering.
    pub ignore_sabm: BTreeMap<u8, usize>,
    /// DLCIs answered with DM.
    pub refuse: Vec<u8>,
    /// Commands (without the trailing CR) answered with `ERROR`.
    pub reject: Vec<String>,
    /// Whether the digital audio interface already has the expected setting.
    pub audio_configured: bool,
    /// `+CSQ` rssi value.
    pub rssi: u8,
    /// Send an MSC command after establishing each data channel.
    pub send_msc: bool,
}

impl Default for EmulatorOptions {
    fn default() -> Self {
        Self {
            baud: 115_200,
            start_multiplexed: false,
            echo: true,
            ignore_sabm: BTreeMap::new(),
            refuse: Vec::new(),
            reject: Vec::new(),
            audio_configured: true,
            rssi: 20,
            send_msc: true,
        }
    }
}

/// Builder for an emulated modem.
#[derive(Debug, Clone, Default)]
pub struct ModemEmulator {
    options: EmulatorOptions,
}

impl ModemEmulator {
    pub fn new(options: EmulatorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &EmulatorOptions {
        &self.options
    }

    /// A fake transport driven by this emulator.
    pub fn into_fake(self) -> FakeModem {
        let mut state = EmulatorState::new(self.options);
        FakeModem::with_responder(move |event| state.on_write(event))
    }
}

/// A UIH frame on the Notifications channel, as the modem sends a URC.
pub fn urc_frame(text: &str) -> Vec<u8> {
    modem_frame(
        ChannelRole::Notifications.dlci(),
        FrameType::Uih,
        Bytes::copy_from_slice(text.as_bytes()),
    )
}

fn modem_frame(dlci: u8, kind: FrameType, payload: Bytes) -> Vec<u8> {
    let mut buf = BytesMut::new();
    match Frame::new(dlci, true, kind, payload).encode(&mut buf) {
        Ok(()) => buf.to_vec(),
        Err(_) => Vec::new(),
    }
}

struct EmulatorState {
    options: EmulatorOptions,
    baud: u32,
    pending_baud: Option<u32>,
    multiplexed: bool,
    echo: bool,
    demux: Demuxer,
    sabm_seen: BTreeMap<u8, usize>,
    lines: BTreeMap<u8, Vec<u8>>,
}

/// Key for the plain-mode line buffer.
const PLAIN: u8 = u8::MAX;

impl EmulatorState {
    fn new(options: EmulatorOptions) -> Self {
        Self {
            baud: options.baud,
            pending_baud: None,
            multiplexed: options.start_multiplexed,
            echo: options.echo,
            demux: Demuxer::new(Compat::default()),
            sabm_seen: BTreeMap::new(),
            lines: BTreeMap::new(),
            options,
        }
    }

    fn on_write(&mut self, event: WriteEvent<'_>) -> Vec<u8> {
        if let Some(baud) = self.pending_baud.take() {
            self.baud = baud;
        }
        if event.baud != self.baud {
            trace!(host = event.baud, modem = self.baud, "emulator: baud mismatch");
            return Vec::new();
        }
        if self.multiplexed {
            self.on_frames(event.bytes)
        } else if event.bytes.first() == Some(&cellmux_frame::FLAG) {
            trace!("emulator: frame in plain mode ignored");
            Vec::new()
        } else {
            self.take_lines(PLAIN, event.bytes)
                .into_iter()
                .flat_map(|line| self.answer(&line))
                .collect()
        }
    }

    fn take_lines(&mut self, key: u8, bytes: &[u8]) -> Vec<String> {
        let pending = self.lines.entry(key).or_default();
        let mut out = Vec::new();
        for &b in bytes {
            if b == b'\r' {
                let line = String::from_utf8_lossy(pending).trim().to_string();
                pending.clear();
                if !line.is_empty() {
                    out.push(line);
                }
            } else if b != b'\n' {
                pending.push(b);
            }
        }
        out
    }

    /// Reply text for one AT command line.
    fn answer(&mut self, line: &str) -> Vec<u8> {
        if !line.to_ascii_uppercase().starts_with("AT") {
            return Vec::new();
        }
        let mut reply = String::new();
        if self.echo {
            reply.push_str(line);
            reply.push('\r');
        }

        if self.options.reject.iter().any(|r| r == line) {
            reply.push_str("\r\nERROR\r\n");
            return reply.into_bytes();
        }

        let body = match line {
            "ATE0" => {
                self.echo = false;
                None
            }
            "ATI" => Some("Quectel\r\nEC25\r\nRevision: EC25EFAR06A06M4G".to_string()),
            "AT+CSQ" => Some(format!("+CSQ: {},99", self.options.rssi)),
            "AT+QDAI?" => Some(if self.options.audio_configured {
                "+QDAI: 1,0,0,3,0,1,1,1".to_string()
            } else {
                "+QDAI: 1,1,0,1,0,0,1,1".to_string()
            }),
            _ if line.starts_with("AT+CMUX=") => {
                self.enter_cmux(line);
                None
            }
            _ => None,
        };
        if let Some(body) = body {
            reply.push_str("\r\n");
            reply.push_str(&body);
            reply.push_str("\r\n");
        }
        reply.push_str("\r\nOK\r\n");
        reply.into_bytes()
    }

    fn enter_cmux(&mut self, line: &str) {
        let speed = line["AT+CMUX=".len()..]
            .split(',')
            .nth(2)
            .and_then(|code| code.trim().parse::<u8>().ok())
            .and_then(|code| PortSpeed::ALL.into_iter().find(|s| s.cmux_code() == code));
        debug!(?speed, "emulator: entering CMUX");
        self.multiplexed = true;
        self.demux.reset();
        self.sabm_seen.clear();
        // The new speed applies after the OK has gone out.
        self.pending_baud = speed.map(PortSpeed::baud);
    }

    fn on_frames(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut frames = Vec::new();
        self.demux.push(bytes, |frame| frames.push(frame));
        let mut out = Vec::new();
        for frame in frames {
            out.extend(self.on_frame(frame));
            if !self.multiplexed {
                break;
            }
        }
        out
    }

    fn on_frame(&mut self, frame: Frame) -> Vec<u8> {
        let dlci = frame.dlci();
        match frame.frame_type() {
            Some(FrameType::Sabm) => self.on_sabm(dlci),
            Some(FrameType::Disc) => {
                if dlci == CONTROL {
                    self.leave_cmux();
                }
                modem_frame(dlci, FrameType::Ua, Bytes::new())
            }
            Some(FrameType::Uih) if dlci == CONTROL => self.on_control(&frame.payload),
            Some(FrameType::Uih) => {
                let lines = self.take_lines(dlci, &frame.payload);
                let text: Vec<u8> = lines.into_iter().flat_map(|l| self.answer(&l)).collect();
                text.chunks(DEFAULT_MAX_FRAME_SIZE)
                    .flat_map(|chunk| {
                        modem_frame(dlci, FrameType::Uih, Bytes::copy_from_slice(chunk))
                    })
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    fn on_sabm(&mut self, dlci: u8) -> Vec<u8> {
        if self.options.refuse.contains(&dlci) {
            debug!(dlci, "emulator: refusing channel");
            return modem_frame(dlci, FrameType::Dm, Bytes::new());
        }
        let seen = self.sabm_seen.entry(dlci).or_default();
        *seen += 1;
        let ignore = self.options.ignore_sabm.get(&dlci).copied().unwrap_or(0);
        if *seen <= ignore {
            debug!(dlci, attempt = *seen, "emulator: ignoring SABM");
            return Vec::new();
        }

        let mut out = modem_frame(dlci, FrameType::Ua, Bytes::new());
        if self.options.send_msc && dlci != CONTROL {
            let status = ModemStatus {
                dlci,
                signals: V24Signals(V24Signals::RTC | V24Signals::RTR | V24Signals::DV),
            };
            let msc = ControlMessage::command(ControlType::Msc, status.encode());
            out.extend(modem_frame(CONTROL, FrameType::Uih, msc.encode()));
        }
        out
    }

    fn on_control(&mut self, payload: &[u8]) -> Vec<u8> {
        let Ok(messages) = ControlMessage::decode_all(payload) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for message in messages.iter().filter(|m| m.command) {
            match message.kind {
                ControlType::Cld => {
                    out.extend(modem_frame(
                        CONTROL,
                        FrameType::Uih,
                        message.to_response().encode(),
                    ));
                    self.leave_cmux();
                    break;
                }
                ControlType::Msc | ControlType::Test | ControlType::FcOn | ControlType::FcOff => {
                    out.extend(modem_frame(
                        CONTROL,
                        FrameType::Uih,
                        message.to_response().encode(),
                    ));
                }
                _ => {
                    out.extend(modem_frame(
                        CONTROL,
                        FrameType::Uih,
                        message.not_supported().encode(),
                    ));
                }
            }
        }
        out
    }

    fn leave_cmux(&mut self) {
        debug!("emulator: leaving CMUX");
        self.multiplexed = false;
        self.demux.reset();
        self.lines.clear();
    }
}
