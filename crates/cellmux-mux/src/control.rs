//! Inbound frame routing and the DLCI 0 control channel.
//!
//! Runs on the receive thread. Information frames go to their channel,
//! link replies (UA, DM) satisfy an establishment or release wait, and
//! modem-initiated link frames and control messages are answered here.

use bytes::Bytes;
use cellmux_frame::{ControlMessage, ControlType, Frame, FrameType, CONTROL};
use tracing::{debug, info, trace, warn};

use crate::controller::Shared;

impl Shared {
    /// Deliver one decoded frame.
    pub(crate) fn route(&self, frame: Frame) {
        let dlci = frame.dlci();
        let Some(kind) = frame.frame_type() else {
            debug!(dlci, control = frame.control, "unknown control field, dropping frame");
            return;
        };
        trace!(dlci, kind = %kind, len = frame.payload.len(), "rx frame");

        match kind {
            FrameType::Uih | FrameType::Ui if dlci == CONTROL => {
                self.handle_control(&frame.payload);
            }
            FrameType::Uih | FrameType::Ui => match self.channel(dlci) {
                Some(channel) => channel.dispatch(frame.payload),
                None => debug!(dlci, len = frame.payload.len(), "frame for unregistered DLCI"),
            },
            FrameType::Ua | FrameType::Dm => match self.channel(dlci) {
                Some(channel) => channel.link_reply(kind),
                None => debug!(dlci, kind = %kind, "link reply for unregistered DLCI"),
            },
            FrameType::Sabm => {
                let reply = if self.channel(dlci).is_some() {
                    FrameType::Ua
                } else {
                    FrameType::Dm
                };
                debug!(dlci, reply = %reply, "modem requested channel");
                self.reply(dlci, reply);
            }
            FrameType::Disc if dlci == CONTROL => {
                self.reply(dlci, FrameType::Ua);
                info!("modem closed the multiplexer");
                self.revert_to_plain();
            }
            FrameType::Disc => match self.unregister(dlci) {
                Some(channel) => {
                    self.reply(dlci, FrameType::Ua);
                    channel.mark_closed();
                    info!(dlci, channel = channel.name(), "modem released channel");
                }
                None => self.reply(dlci, FrameType::Dm),
            },
            FrameType::I => debug!(dlci, "I frames are not supported, dropping"),
        }
    }

    /// Answer a link frame as the responder (C/R clear, F set).
    fn reply(&self, dlci: u8, kind: FrameType) {
        if let Err(err) = self.writer.send(dlci, false, kind, Bytes::new()) {
            warn!(dlci, reply = %kind, error = %err, "link reply not sent");
        }
    }

    fn respond(&self, message: &ControlMessage) {
        if let Err(err) = self.writer.send_control(message) {
            warn!(kind = message.kind.name(), error = %err, "control response not sent");
        }
    }

    fn handle_control(&self, payload: &[u8]) {
        let messages = match ControlMessage::decode_all(payload) {
            Ok(messages) => messages,
            Err(err) => {
                warn!(error = %err, len = payload.len(), "malformed control message");
                return;
            }
        };

        for message in messages {
            if message.command {
                self.control_command(&message);
            } else {
                self.control_response(&message);
            }
        }
    }

    fn control_command(&self, message: &ControlMessage) {
        match message.kind {
            ControlType::Msc => match message.modem_status() {
                Ok(status) => {
                    let signals = status.signals;
                    debug!(
                        dlci = status.dlci,
                        fc = signals.flow_control(),
                        rtc = signals.ready_to_communicate(),
                        rtr = signals.ready_to_receive(),
                        ic = signals.incoming_call(),
                        dv = signals.data_valid(),
                        "modem status"
                    );
                    match self.channel(status.dlci) {
                        Some(channel) => {
                            channel.set_sending_allowed(signals.ready_to_communicate());
                        }
                        None => debug!(dlci = status.dlci, "modem status for unregistered DLCI"),
                    }
                    self.respond(&message.to_response());
                }
                Err(err) => warn!(error = %err, "bad modem status command"),
            },
            ControlType::FcOff | ControlType::FcOn => {
                let allowed = message.kind == ControlType::FcOn;
                info!(allowed, "modem flow control");
                for channel in self.channels() {
                    channel.set_sending_allowed(allowed);
                }
                self.respond(&message.to_response());
            }
            ControlType::Test | ControlType::Psc | ControlType::Pn => {
                debug!(kind = message.kind.name(), "acknowledging control command");
                self.respond(&message.to_response());
            }
            ControlType::Cld => {
                self.respond(&message.to_response());
                info!("modem requested close-down");
                self.revert_to_plain();
            }
            ControlType::Nsc | ControlType::Other(_) => {
                warn!(type_octet = message.type_octet(), "unsupported control command");
                self.respond(&message.not_supported());
            }
        }
    }

    fn control_response(&self, message: &ControlMessage) {
        match message.kind {
            ControlType::Nsc => warn!(
                type_octet = message.value.first().copied(),
                "modem does not support control command"
            ),
            kind => debug!(kind = kind.name(), "control response"),
        }
    }
}
