use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use cellmux_frame::{dlci_name, FrameType, FrameWriter};
use cellmux_transport::{Transport, TransportError};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::at::{await_reply, AtResponse};
use crate::config::ChannelParameters;
use crate::error::{MuxError, Result};
use crate::response::{Offer, ResponseBuffer, WaitError};

/// Callback for frames that arrive while no command is outstanding.
pub type AsyncCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Link state of one DLCI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DlcState {
    Closed,
    Establishing,
    Active,
}

impl std::fmt::Display for DlcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DlcState::Closed => "closed",
            DlcState::Establishing => "establishing",
            DlcState::Active => "active",
        })
    }
}

/// Per-channel delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Payloads handed to a waiting caller or the async callback.
    pub delivered: u64,
    /// Payloads with nowhere to go, or refused by a full buffer.
    pub dropped: u64,
}

/// One data link connection.
///
/// Inbound payloads go to exactly one place: the response buffer while a
/// command is outstanding, otherwise the async callback, otherwise nowhere
/// (counted as dropped).
pub struct DlcChannel {
    dlci: u8,
    params: ChannelParameters,
    writer: FrameWriter<dyn Transport>,
    state: Mutex<DlcState>,
    responses: ResponseBuffer<Bytes>,
    link: ResponseBuffer<FrameType>,
    callback: Mutex<Option<AsyncCallback>>,
    sending_allowed: AtomicBool,
    /// Set when the session's transport died under this channel.
    link_failed: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl DlcChannel {
    pub(crate) fn new(
        dlci: u8,
        writer: FrameWriter<dyn Transport>,
        params: ChannelParameters,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            dlci,
            params,
            writer,
            state: Mutex::new(DlcState::Closed),
            responses: ResponseBuffer::new(buffer_capacity),
            link: ResponseBuffer::new(4),
            callback: Mutex::new(None),
            sending_allowed: AtomicBool::new(true),
            link_failed: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn dlci(&self) -> u8 {
        self.dlci
    }

    pub fn name(&self) -> &'static str {
        dlci_name(self.dlci)
    }

    pub fn state(&self) -> DlcState {
        *lock(&self.state)
    }

    pub fn is_active(&self) -> bool {
        self.state() == DlcState::Active
    }

    pub fn params(&self) -> &ChannelParameters {
        &self.params
    }

    /// Run the SABM/UA handshake.
    ///
    /// Each attempt waits one establish timeout for UA. A DM reply ends the
    /// sequence at once. Returns the resulting state; only transport
    /// failures are errors.
    pub fn establish(&self) -> Result<DlcState> {
        self.establish_since(self.abort_epoch())
    }

    /// Abort count of this channel.
    pub(crate) fn abort_epoch(&self) -> u64 {
        self.link.abort_epoch()
    }

    /// [`establish`](Self::establish), giving up on any abort after `epoch`.
    pub(crate) fn establish_since(&self, epoch: u64) -> Result<DlcState> {
        self.check_link()?;
        self.set_state(DlcState::Establishing);
        self.responses.reopen();
        self.link.reopen();

        let attempts = u32::from(self.params.max_retransmissions.max(1));
        let timeout = self.params.establish_timeout();
        for attempt in 1..=attempts {
            if self.link.abort_epoch() != epoch {
                debug!(dlci = self.dlci, attempt, "establishment aborted");
                break;
            }
            debug!(dlci = self.dlci, attempt, "sending SABM");
            let wait = self.link.begin_since(epoch);
            if let Err(err) = self
                .writer
                .send(self.dlci, true, FrameType::Sabm, Bytes::new())
            {
                self.set_state(DlcState::Closed);
                return Err(err.into());
            }
            match wait.next_within(timeout) {
                Ok(FrameType::Ua) => {
                    self.set_state(DlcState::Active);
                    info!(dlci = self.dlci, channel = self.name(), attempt, "channel established");
                    return Ok(DlcState::Active);
                }
                Ok(FrameType::Dm) => {
                    warn!(dlci = self.dlci, attempt, "modem refused channel (DM)");
                    break;
                }
                Ok(other) => {
                    debug!(dlci = self.dlci, kind = %other, "ignoring link frame while establishing");
                }
                Err(WaitError::Closed) if self.link_failed() => {
                    self.set_state(DlcState::Closed);
                    return Err(MuxError::Transport(TransportError::Shutdown));
                }
                Err(WaitError::Closed) => break,
                Err(WaitError::TimedOut) if wait.aborted() => break,
                Err(WaitError::TimedOut) => {
                    debug!(dlci = self.dlci, attempt, "no UA");
                }
            }
        }

        self.set_state(DlcState::Closed);
        warn!(dlci = self.dlci, channel = self.name(), "channel not established");
        Ok(DlcState::Closed)
    }

    /// Send DISC and wait one establish timeout for UA or DM.
    ///
    /// The channel ends closed either way.
    pub fn close(&self) -> Result<()> {
        if self.state() == DlcState::Closed {
            return Ok(());
        }
        let wait = self.link.begin();
        let sent = self
            .writer
            .send(self.dlci, true, FrameType::Disc, Bytes::new());
        let outcome = match sent {
            Ok(()) => {
                match wait.next_within(self.params.establish_timeout()) {
                    Ok(kind) => debug!(dlci = self.dlci, reply = %kind, "channel released"),
                    Err(_) => debug!(dlci = self.dlci, "no reply to DISC"),
                }
                Ok(())
            }
            Err(err) => Err(err.into()),
        };
        drop(wait);
        self.mark_closed();
        outcome
    }

    /// Send `text` and block until the reply completes.
    ///
    /// The reply completes on a final result code, the `>` prompt, or once
    /// `expected_lines` lines arrived (0 waits for a final code).
    pub fn send_command(
        &self,
        text: &str,
        expected_lines: usize,
        timeout: Duration,
    ) -> Result<AtResponse> {
        self.check_can_send()?;
        let deadline = Instant::now() + timeout;
        let wait = self.responses.begin();
        trace!(dlci = self.dlci, command = text.trim_end(), "send command");
        self.writer.send_data(self.dlci, text.as_bytes())?;

        match await_reply(&wait, expected_lines, deadline) {
            Ok(response) => Ok(response),
            Err(WaitError::TimedOut) => {
                debug!(dlci = self.dlci, command = text.trim_end(), "command timed out");
                Err(MuxError::CommandTimeout {
                    command: text.trim_end().to_string(),
                    timeout,
                })
            }
            Err(WaitError::Closed) => Err(self.closed_error()),
        }
    }

    /// Send raw bytes as one or more UIH frames. Returns the frame count.
    pub fn send_data(&self, data: &[u8]) -> Result<usize> {
        self.check_can_send()?;
        Ok(self.writer.send_data(self.dlci, data)?)
    }

    /// Register the callback for unsolicited payloads.
    pub fn set_async_callback<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        *lock(&self.callback) = Some(Arc::new(callback));
    }

    pub fn clear_async_callback(&self) {
        *lock(&self.callback) = None;
    }

    /// Transmit latch driven by the modem's ready-to-communicate signal.
    pub fn set_sending_allowed(&self, allowed: bool) {
        let was = self.sending_allowed.swap(allowed, Ordering::SeqCst);
        if was != allowed {
            debug!(dlci = self.dlci, allowed, "sending latch changed");
        }
    }

    pub fn sending_allowed(&self) -> bool {
        self.sending_allowed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Collapse any wait in progress on this channel.
    pub fn abort(&self) {
        self.responses.abort();
        self.link.abort();
    }

    /// Inbound UIH/UI payload from the receive loop.
    pub(crate) fn dispatch(&self, payload: Bytes) {
        match self.responses.offer(payload) {
            Offer::Queued => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Offer::Full(payload) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    dlci = self.dlci,
                    len = payload.len(),
                    error = %MuxError::ResponseBufferFull { dlci: self.dlci },
                    "full response buffer, dropping frame"
                );
            }
            Offer::NotAwaiting(payload) => {
                let callback = lock(&self.callback).clone();
                match callback {
                    Some(callback) => {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                        callback(&payload);
                    }
                    None => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(dlci = self.dlci, len = payload.len(), "no receiver, dropping frame");
                    }
                }
            }
        }
    }

    /// Inbound UA or DM from the receive loop.
    pub(crate) fn link_reply(&self, kind: FrameType) {
        if let Offer::NotAwaiting(kind) = self.link.offer(kind) {
            debug!(dlci = self.dlci, kind = %kind, "unsolicited link reply");
            if kind == FrameType::Dm && self.is_active() {
                self.mark_closed();
            }
        }
    }

    /// Move to closed and wake every waiter.
    pub(crate) fn mark_closed(&self) {
        self.set_state(DlcState::Closed);
        self.responses.close();
        self.link.close();
    }

    /// Close because the transport failed; waiters see a transport error.
    pub(crate) fn mark_failed(&self) {
        self.link_failed.store(true, Ordering::SeqCst);
        self.mark_closed();
    }

    fn link_failed(&self) -> bool {
        self.link_failed.load(Ordering::SeqCst)
    }

    fn check_link(&self) -> Result<()> {
        if self.link_failed() {
            return Err(MuxError::Transport(TransportError::Shutdown));
        }
        Ok(())
    }

    fn closed_error(&self) -> MuxError {
        if self.link_failed() {
            MuxError::Transport(TransportError::Shutdown)
        } else {
            MuxError::ChannelClosed(self.dlci)
        }
    }

    fn check_can_send(&self) -> Result<()> {
        self.check_link()?;
        if !self.is_active() {
            return Err(MuxError::ChannelNotOpen(self.dlci));
        }
        if !self.sending_allowed() {
            return Err(MuxError::SendingBlocked(self.dlci));
        }
        Ok(())
    }

    fn set_state(&self, state: DlcState) {
        *lock(&self.state) = state;
    }
}

impl std::fmt::Debug for DlcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlcChannel")
            .field("dlci", &self.dlci)
            .field("state", &self.state())
            .field("sending_allowed", &self.sending_allowed())
            .field("stats", &self.stats())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
