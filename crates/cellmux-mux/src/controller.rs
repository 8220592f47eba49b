//! The multiplexer controller.
//!
//! [`MuxController`] owns the transport, the receive thread and the channel
//! registry. It walks the modem through baud detection, AT configuration
//! and CMUX startup, and reverts to plain AT mode on close-down or drop.
//!
//! Lifecycle operations (detect, configure, start, open, close) are
//! serialized by one lock; inbound traffic is handled on the `cellmux-rx`
//! thread and never takes it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use cellmux_frame::{
    hex_dump, ChannelRole, ControlMessage, DemuxStats, Demuxer, FrameWriter,
    DEFAULT_MAX_FRAME_SIZE,
};
use cellmux_transport::{Transport, TransportError};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::at::{await_reply, AtResponse, SignalStrength};
use crate::config::{MuxConfig, PortSpeed};
use crate::dlc::{ChannelStats, DlcChannel, DlcState};
use crate::error::{MuxError, Result};
use crate::response::{Offer, ResponseBuffer, WaitError};

/// Line speed used when detection gives up.
pub const FALLBACK_BAUD: u32 = 115_200;

/// Controller-wide framing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Raw AT text, no framing.
    Plain,
    /// `AT+CMUX` accepted, channels being established.
    Negotiating,
    /// Every byte on the link is framed.
    Multiplexed,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Mode::Plain => "plain",
            Mode::Negotiating => "negotiating",
            Mode::Multiplexed => "multiplexed",
        })
    }
}

/// One step of the baud detection sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BaudStep {
    /// Set the speed and probe.
    Speed(u32),
    /// Send close-down in case the modem is still multiplexed, then probe.
    CloseCmux(u32),
}

const BAUD_SWEEP: [BaudStep; 4] = [
    BaudStep::Speed(460_800),
    BaudStep::CloseCmux(460_800),
    BaudStep::Speed(115_200),
    BaudStep::CloseCmux(115_200),
];

/// Snapshot of one registered channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub dlci: u8,
    pub name: &'static str,
    pub state: DlcState,
    pub sending_allowed: bool,
    #[serde(flatten)]
    pub stats: ChannelStats,
}

/// Early deadline collapse for sleeps outside any response buffer.
struct AbortSignal {
    epoch: Mutex<u64>,
    fired: Condvar,
}

impl AbortSignal {
    fn new() -> Self {
        Self {
            epoch: Mutex::new(0),
            fired: Condvar::new(),
        }
    }

    fn epoch(&self) -> u64 {
        *lock(&self.epoch)
    }

    fn trigger(&self) {
        *lock(&self.epoch) += 1;
        self.fired.notify_all();
    }

    fn fired_since(&self, epoch: u64) -> bool {
        self.epoch() != epoch
    }

    /// Sleep for `duration`. Returns false if aborted first.
    fn sleep(&self, duration: Duration, epoch: u64) -> bool {
        let deadline = Instant::now() + duration;
        let mut current = lock(&self.epoch);
        loop {
            if *current != epoch {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            current = self
                .fired
                .wait_timeout(current, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// State shared between the controller and the receive thread.
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) writer: FrameWriter<dyn Transport>,
    pub(crate) config: MuxConfig,
    mode: Mutex<Mode>,
    channels: Mutex<BTreeMap<u8, Arc<DlcChannel>>>,
    plain: ResponseBuffer<Bytes>,
    demux: Mutex<Demuxer>,
    shutdown: AtomicBool,
    fatal: Mutex<Option<String>>,
    signal: Mutex<Option<SignalStrength>>,
    abort: AbortSignal,
}

impl Shared {
    pub(crate) fn new(transport: Arc<dyn Transport>, config: MuxConfig) -> Self {
        let frame_size = usize::from(config.mux.max_frame_size);
        let writer = FrameWriter::with_max_frame_size(Arc::clone(&transport), frame_size);
        let demux =
            Demuxer::with_max_payload(config.compat, frame_size.max(DEFAULT_MAX_FRAME_SIZE));
        Self {
            transport,
            writer,
            plain: ResponseBuffer::new(config.response_buffer_capacity),
            demux: Mutex::new(demux),
            config,
            mode: Mutex::new(Mode::Plain),
            channels: Mutex::new(BTreeMap::new()),
            shutdown: AtomicBool::new(false),
            fatal: Mutex::new(None),
            signal: Mutex::new(None),
            abort: AbortSignal::new(),
        }
    }

    pub(crate) fn mode(&self) -> Mode {
        *lock(&self.mode)
    }

    pub(crate) fn set_mode(&self, mode: Mode) {
        let previous = std::mem::replace(&mut *lock(&self.mode), mode);
        if previous != mode {
            info!(from = %previous, to = %mode, "mode changed");
        }
    }

    pub(crate) fn channel(&self, dlci: u8) -> Option<Arc<DlcChannel>> {
        lock(&self.channels).get(&dlci).cloned()
    }

    pub(crate) fn channels(&self) -> Vec<Arc<DlcChannel>> {
        lock(&self.channels).values().cloned().collect()
    }

    pub(crate) fn register(&self, channel: Arc<DlcChannel>) {
        lock(&self.channels).insert(channel.dlci(), channel);
    }

    pub(crate) fn unregister(&self, dlci: u8) -> Option<Arc<DlcChannel>> {
        lock(&self.channels).remove(&dlci)
    }

    /// Close every channel, drop the registry and go back to plain AT.
    pub(crate) fn revert_to_plain(&self) {
        let channels = std::mem::take(&mut *lock(&self.channels));
        for channel in channels.values() {
            channel.mark_closed();
        }
        lock(&self.demux).reset();
        self.set_mode(Mode::Plain);
    }

    /// Record a fatal link failure and wake everything that waits.
    fn fail(&self, err: &TransportError) {
        let mut fatal = lock(&self.fatal);
        if fatal.is_some() {
            return;
        }
        error!(error = %err, transport = self.transport.name(), "transport failed, session over");
        *fatal = Some(err.to_string());
        drop(fatal);

        let channels = std::mem::take(&mut *lock(&self.channels));
        for channel in channels.values() {
            channel.mark_failed();
        }
        self.revert_to_plain();
        self.plain.close();
        self.abort.trigger();
    }

    fn check_alive(&self) -> Result<()> {
        if lock(&self.fatal).is_some() {
            return Err(MuxError::Transport(TransportError::Shutdown));
        }
        Ok(())
    }

    /// Route bytes from one read.
    fn ingest(&self, bytes: &[u8]) {
        if self.mode() == Mode::Plain {
            match self.plain.offer(Bytes::copy_from_slice(bytes)) {
                Offer::Queued => {}
                Offer::NotAwaiting(bytes) => {
                    debug!(data = %hex_dump(&bytes), "unsolicited data in plain mode");
                }
                Offer::Full(bytes) => {
                    warn!(len = bytes.len(), "full plain response buffer, dropping data");
                }
            }
            return;
        }

        let mut frames = Vec::new();
        lock(&self.demux).push(bytes, |frame| frames.push(frame));
        for frame in frames {
            self.route(frame);
        }
    }
}

fn rx_loop(shared: &Shared) {
    let mut buf = [0u8; 2048];
    let poll = shared.config.poll_interval();
    debug!(transport = shared.transport.name(), "receive loop started");
    while !shared.shutdown.load(Ordering::SeqCst) {
        match shared.transport.read(&mut buf, poll) {
            Ok(0) => {}
            Ok(n) => {
                trace!(len = n, data = %hex_dump(&buf[..n]), "rx");
                shared.ingest(&buf[..n]);
            }
            Err(err) => {
                shared.fail(&err);
                break;
            }
        }
    }
    debug!("receive loop stopped");
}

/// Drives one modem through detection, configuration and multiplexing.
pub struct MuxController<T: Transport> {
    transport: Arc<T>,
    shared: Arc<Shared>,
    lifecycle: Mutex<()>,
    plain_exchange: Mutex<()>,
    rx: Option<JoinHandle<()>>,
}

impl<T: Transport> MuxController<T> {
    /// Take ownership of the link, flush stale input and start receiving.
    pub fn new(transport: Arc<T>, config: MuxConfig) -> Result<Self> {
        config.validate()?;

        let flushed = transport.discard_input()?;
        if flushed > 0 {
            info!(bytes = flushed, "discarded stale input");
        }

        let link: Arc<dyn Transport> = transport.clone();
        let shared = Arc::new(Shared::new(link, config));
        let rx = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("cellmux-rx".into())
                .spawn(move || rx_loop(&shared))?
        };

        Ok(Self {
            transport,
            shared,
            lifecycle: Mutex::new(()),
            plain_exchange: Mutex::new(()),
            rx: Some(rx),
        })
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn config(&self) -> &MuxConfig {
        &self.shared.config
    }

    pub fn mode(&self) -> Mode {
        self.shared.mode()
    }

    /// Sweep line speeds until the modem answers `AT` or `timeout` passes.
    ///
    /// Returns the detected baud rate. On failure the line is left at
    /// [`FALLBACK_BAUD`].
    pub fn baud_detect(&self, timeout: Duration) -> Result<u32> {
        let _lifecycle = lock(&self.lifecycle);
        self.require_mode(Mode::Plain)?;
        let result = self.baud_detect_locked(timeout);
        self.watch(result)
    }

    fn baud_detect_locked(&self, timeout: Duration) -> Result<u32> {
        let epoch = self.shared.abort.epoch();
        let deadline = Instant::now() + timeout;
        let mut sweeps = 0u32;
        loop {
            sweeps += 1;
            for step in BAUD_SWEEP {
                if self.shared.abort.fired_since(epoch) {
                    break;
                }
                let baud = match step {
                    BaudStep::Speed(baud) => {
                        self.transport.set_baud_rate(baud)?;
                        baud
                    }
                    BaudStep::CloseCmux(baud) => {
                        self.shared.writer.send_control(&ControlMessage::close_down())?;
                        self.shared
                            .abort
                            .sleep(self.shared.config.cmux_close_delay(), epoch);
                        baud
                    }
                };
                debug!(?step, baud, "probing modem");
                if self.probe()? {
                    info!(baud, sweeps, "modem answered");
                    return Ok(baud);
                }
            }
            if Instant::now() >= deadline || self.shared.abort.fired_since(epoch) {
                break;
            }
        }

        self.transport.set_baud_rate(FALLBACK_BAUD)?;
        error!(sweeps, "no baud rate found");
        Err(MuxError::BaudNotFound)
    }

    /// True if the modem sent any complete reply to `AT`.
    fn probe(&self) -> Result<bool> {
        let at = &self.shared.config.commands.at;
        match self.plain_command(at, 0, self.shared.config.command_timeout()) {
            Ok(_) => Ok(true),
            Err(MuxError::CommandTimeout { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Run the AT bring-up sequence in plain mode.
    pub fn configure(&self) -> Result<()> {
        let _lifecycle = lock(&self.lifecycle);
        self.require_mode(Mode::Plain)?;
        let result = self.configure_locked(self.shared.abort.epoch());
        self.watch(result)
    }

    fn configure_locked(&self, epoch: u64) -> Result<()> {
        let commands = &self.shared.config.commands;
        self.configure_step(&commands.flow_control_on, epoch)?;
        self.configure_step(&commands.factory_reset, epoch)?;
        self.configure_step(&commands.echo_off, epoch)?;

        let info = self.configure_step(&commands.sw_info, epoch)?;
        for line in info.info_lines() {
            info!(line, "modem info");
        }

        for command in &commands.modem_init {
            self.configure_step(command, epoch)?;
        }

        let deadline = Instant::now() + self.shared.config.configure_deadline();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.configure_step(&commands.sleep_clock_on, epoch) {
                Ok(_) => break,
                Err(err @ MuxError::Transport(_)) => return Err(err),
                Err(err) => {
                    let now = Instant::now();
                    if now >= deadline {
                        error!(attempt, error = %err, "modem configuration failed");
                        return Err(err);
                    }
                    debug!(attempt, error = %err, "retrying final configuration command");
                    let pause = self
                        .shared
                        .config
                        .configure_retry_interval()
                        .min(deadline - now);
                    if !self.shared.abort.sleep(pause, epoch) {
                        return Err(err);
                    }
                }
            }
        }

        info!("modem configured");
        Ok(())
    }

    /// Check the digital audio interface and apply the audio command list.
    ///
    /// Returns [`MuxError::ModemNeedsReset`] after writing the interface
    /// setting for the first time.
    pub fn audio_configure(&self) -> Result<()> {
        let _lifecycle = lock(&self.lifecycle);
        let result = self.audio_configure_locked();
        self.watch(result)
    }

    fn audio_configure_locked(&self) -> Result<()> {
        let commands = &self.shared.config.commands;
        let reply = self.command_locked(&commands.audio_query)?;
        let current = reply.info_lines().next();

        if current == Some(commands.audio_expected.as_str()) {
            for command in &commands.audio_setup {
                self.command_locked(command)?;
            }
            info!("audio path configured");
            return Ok(());
        }

        info!(current, "audio interface not set up, initialising");
        self.command_locked(&commands.audio_init)?;
        warn!("audio interface written, modem needs reset");
        Err(MuxError::ModemNeedsReset)
    }

    /// Enable CMUX on the modem and establish all four channels.
    ///
    /// Either every channel ends active and the mode is
    /// [`Mode::Multiplexed`], or the modem is sent close-down and the
    /// controller is back in [`Mode::Plain`] with nothing active.
    pub fn start_multiplexer(&self) -> Result<()> {
        let _lifecycle = lock(&self.lifecycle);
        self.require_mode(Mode::Plain)?;
        let result = self.start_locked(self.shared.abort.epoch());
        self.watch(result)
    }

    fn start_locked(&self, epoch: u64) -> Result<()> {
        let line_speed = self.transport.baud_rate();
        let speed = match self.shared.config.mux.port_speed {
            Some(speed) => speed,
            None => PortSpeed::from_baud(line_speed).ok_or_else(|| {
                MuxError::Config(format!("line speed {line_speed} has no CMUX port-speed code"))
            })?,
        };

        let command = self.shared.config.mux.cmux_command(speed);
        info!(command = command.trim_end(), "enabling multiplexer");
        self.plain_ok(&command)?;

        if speed.baud() != line_speed {
            self.transport.set_baud_rate(speed.baud())?;
        }
        lock(&self.shared.demux).reset();
        self.shared.set_mode(Mode::Negotiating);

        for role in ChannelRole::ALL {
            if let Err(err) = self.open_locked(role, epoch) {
                error!(channel = role.name(), error = %err, "multiplexer startup failed");
                if let Err(close_err) = self.teardown(true) {
                    warn!(error = %close_err, "close-down after failed startup");
                }
                return Err(err);
            }
        }
        self.shared.set_mode(Mode::Multiplexed);
        info!("multiplexer started");

        self.after_start()
    }

    /// Route URCs to the Notifications channel and read signal strength.
    ///
    /// Only transport failures are errors here.
    fn after_start(&self) -> Result<()> {
        let commands = &self.shared.config.commands;

        match self.command_locked(&commands.set_urc_channel) {
            Ok(_) => debug!("URCs routed to notifications channel"),
            Err(err @ MuxError::Transport(_)) => return Err(err),
            Err(err) => warn!(error = %err, "could not route URCs"),
        }

        match self.command_locked(&commands.sw_info) {
            Ok(reply) => {
                for line in reply.info_lines() {
                    debug!(line, "modem info");
                }
            }
            Err(err @ MuxError::Transport(_)) => return Err(err),
            Err(err) => warn!(error = %err, "modem info query failed"),
        }

        match self.signal_locked() {
            Ok(_) => {}
            Err(err @ MuxError::Transport(_)) => return Err(err),
            Err(err) => warn!(error = %err, "signal strength not set"),
        }
        Ok(())
    }

    /// Ask the modem for `+CSQ` and store the reading.
    pub fn query_signal_strength(&self) -> Result<SignalStrength> {
        let _lifecycle = lock(&self.lifecycle);
        let result = self.signal_locked();
        self.watch(result)
    }

    fn signal_locked(&self) -> Result<SignalStrength> {
        let reply = self.command_locked(&self.shared.config.commands.signal_quality)?;
        let strength = SignalStrength::parse(&reply).ok_or_else(|| MuxError::NegotiationFailure {
            command: self.shared.config.commands.signal_quality.trim_end().to_string(),
            response: reply.lines.join(" | "),
        })?;
        if strength.is_valid() {
            info!(rssi = strength.rssi, dbm = strength.dbm, "signal strength");
        } else {
            warn!(rssi = strength.rssi, "signal strength unknown");
        }
        *lock(&self.shared.signal) = Some(strength);
        Ok(strength)
    }

    /// Establish the channel for `role`, or return the active handle.
    pub fn open(&self, role: ChannelRole) -> Result<Arc<DlcChannel>> {
        let _lifecycle = lock(&self.lifecycle);
        let result = self.open_locked(role, self.shared.abort.epoch());
        self.watch(result)
    }

    /// Gives up without a SABM if [`abort`](Self::abort) fired since `epoch`.
    fn open_locked(&self, role: ChannelRole, epoch: u64) -> Result<Arc<DlcChannel>> {
        self.shared.check_alive()?;
        let mode = self.shared.mode();
        if mode == Mode::Plain {
            return Err(MuxError::InvalidMode {
                expected: Mode::Multiplexed,
                actual: mode,
            });
        }

        let dlci = role.dlci();
        let channel = match self.shared.channel(dlci) {
            Some(existing) if existing.is_active() => return Ok(existing),
            Some(existing) => existing,
            None => Arc::new(DlcChannel::new(
                dlci,
                self.shared.writer.clone(),
                self.shared.config.channel.clone(),
                self.shared.config.response_buffer_capacity,
            )),
        };
        // Registered first so the UA reply can be routed to it.
        self.shared.register(Arc::clone(&channel));

        // Snapshot before checking, so an abort lands in one of the two.
        let link_epoch = channel.abort_epoch();
        let established = if self.shared.abort.fired_since(epoch) {
            debug!(dlci, "open aborted before SABM");
            Ok(DlcState::Closed)
        } else {
            channel.establish_since(link_epoch)
        };

        match established {
            Ok(DlcState::Active) => Ok(channel),
            Ok(_) => {
                self.shared.unregister(dlci);
                Err(MuxError::EstablishTimeout {
                    dlci,
                    attempts: u32::from(channel.params().max_retransmissions),
                })
            }
            Err(err) => {
                self.shared.unregister(dlci);
                Err(err)
            }
        }
    }

    /// Handle for an already opened channel.
    pub fn get(&self, role: ChannelRole) -> Option<Arc<DlcChannel>> {
        self.shared.channel(role.dlci())
    }

    /// Send close-down, release every channel and return to plain mode.
    pub fn close_channels(&self) -> Result<()> {
        let _lifecycle = lock(&self.lifecycle);
        let multiplexed = self.shared.mode() != Mode::Plain;
        let result = self.teardown(multiplexed);
        self.watch(result)
    }

    fn teardown(&self, send_close_down: bool) -> Result<()> {
        let sent = if send_close_down && self.shared.check_alive().is_ok() {
            info!("closing multiplexer");
            self.shared
                .writer
                .send_control(&ControlMessage::close_down())
                .map_err(MuxError::from)
        } else {
            Ok(())
        };
        self.shared.revert_to_plain();
        sent
    }

    /// Send one AT command and require `OK`.
    ///
    /// Uses the Commands channel when multiplexed and the raw link in
    /// plain mode.
    pub fn command(&self, text: &str) -> Result<AtResponse> {
        let _lifecycle = lock(&self.lifecycle);
        let result = self.command_locked(text);
        self.watch(result)
    }

    fn command_locked(&self, text: &str) -> Result<AtResponse> {
        let timeout = self.shared.config.command_timeout();
        match self.shared.mode() {
            Mode::Plain => self.plain_ok(text),
            Mode::Multiplexed => {
                let commands = self
                    .shared
                    .channel(ChannelRole::Commands.dlci())
                    .ok_or(MuxError::ChannelNotOpen(ChannelRole::Commands.dlci()))?;
                commands.send_command(text, 0, timeout)?.into_ok(text)
            }
            actual => Err(MuxError::InvalidMode {
                expected: Mode::Multiplexed,
                actual,
            }),
        }
    }

    /// Plain-mode AT exchange over the raw link.
    ///
    /// `expected_lines` of 0 waits for a final result code.
    pub fn at_command(
        &self,
        text: &str,
        expected_lines: usize,
        timeout: Duration,
    ) -> Result<AtResponse> {
        let result = self.plain_command(text, expected_lines, timeout);
        self.watch(result)
    }

    /// [`plain_ok`](Self::plain_ok) unless an abort fired since `epoch`.
    fn configure_step(&self, text: &str, epoch: u64) -> Result<AtResponse> {
        if self.shared.abort.fired_since(epoch) {
            return Err(MuxError::CommandTimeout {
                command: text.trim_end().to_string(),
                timeout: Duration::ZERO,
            });
        }
        self.plain_ok(text)
    }

    fn plain_ok(&self, text: &str) -> Result<AtResponse> {
        self.plain_command(text, 0, self.shared.config.command_timeout())?
            .into_ok(text)
    }

    fn plain_command(
        &self,
        text: &str,
        expected_lines: usize,
        timeout: Duration,
    ) -> Result<AtResponse> {
        self.shared.check_alive()?;
        self.require_mode(Mode::Plain)?;
        let _exchange = lock(&self.plain_exchange);

        let deadline = Instant::now() + timeout;
        let wait = self.shared.plain.begin();
        trace!(command = text.trim_end(), "plain command");
        self.transport.write_all(text.as_bytes())?;

        match await_reply(&wait, expected_lines, deadline) {
            Ok(reply) => {
                debug!(command = text.trim_end(), outcome = ?reply.outcome, "plain reply");
                Ok(reply)
            }
            Err(WaitError::TimedOut) => Err(MuxError::CommandTimeout {
                command: text.trim_end().to_string(),
                timeout,
            }),
            Err(WaitError::Closed) => Err(MuxError::Transport(TransportError::Shutdown)),
        }
    }

    /// Collapse every outstanding wait, as if its deadline had passed.
    pub fn abort(&self) {
        info!("aborting outstanding operations");
        self.shared.abort.trigger();
        self.shared.plain.abort();
        for channel in self.shared.channels() {
            channel.abort();
        }
    }

    /// Last `+CSQ` reading, if any.
    pub fn signal_strength(&self) -> Option<SignalStrength> {
        *lock(&self.shared.signal)
    }

    pub fn demux_stats(&self) -> DemuxStats {
        lock(&self.shared.demux).stats()
    }

    /// Registered channels in DLCI order.
    pub fn channel_info(&self) -> Vec<ChannelInfo> {
        self.shared
            .channels()
            .iter()
            .map(|channel| ChannelInfo {
                dlci: channel.dlci(),
                name: channel.name(),
                state: channel.state(),
                sending_allowed: channel.sending_allowed(),
                stats: channel.stats(),
            })
            .collect()
    }

    /// Message of the transport failure that ended the session.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.fatal).clone()
    }

    fn require_mode(&self, expected: Mode) -> Result<()> {
        let actual = self.shared.mode();
        if actual != expected {
            return Err(MuxError::InvalidMode { expected, actual });
        }
        Ok(())
    }

    /// Turn a fatal transport error from any operation into session failure.
    fn watch<R>(&self, result: Result<R>) -> Result<R> {
        if let Err(MuxError::Transport(err)) = &result {
            if err.is_fatal() {
                self.shared.fail(err);
            }
        }
        result
    }
}

impl<T: Transport> Drop for MuxController<T> {
    fn drop(&mut self) {
        if self.shared.mode() != Mode::Plain {
            if let Err(err) = self.teardown(true) {
                debug!(error = %err, "close-down on drop");
            }
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.abort.trigger();
        if let Some(rx) = self.rx.take() {
            if rx.join().is_err() {
                warn!("receive thread panicked");
            }
        }
    }
}

impl<T: Transport> std::fmt::Debug for MuxController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxController")
            .field("transport", &self.transport.name())
            .field("mode", &self.shared.mode())
            .field("channels", &self.channel_info())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
