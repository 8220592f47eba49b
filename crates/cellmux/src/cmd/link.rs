//! Opening the modem link and walking it through bring-up.

use std::sync::Arc;
use std::time::Duration;

use cellmux_mux::{EmulatorOptions, ModemEmulator, MuxConfig, MuxController};
use cellmux_transport::{FakeModem, SerialTransport, Transport, TransportError};
use tracing::info;

use crate::cmd::{parse_duration, BringUpArgs, DeviceArgs};
use crate::exit::{mux_error, transport_error, CliError, CliResult, USAGE};

/// The transport behind a CLI session.
#[derive(Debug)]
pub enum Link {
    Serial(SerialTransport),
    Fake(FakeModem),
}

impl Transport for Link {
    fn read(&self, buf: &mut [u8], timeout: Duration) -> cellmux_transport::Result<usize> {
        match self {
            Link::Serial(port) => port.read(buf, timeout),
            Link::Fake(modem) => modem.read(buf, timeout),
        }
    }

    fn write_all(&self, buf: &[u8]) -> cellmux_transport::Result<()> {
        match self {
            Link::Serial(port) => port.write_all(buf),
            Link::Fake(modem) => modem.write_all(buf),
        }
    }

    fn set_baud_rate(&self, baud: u32) -> cellmux_transport::Result<()> {
        match self {
            Link::Serial(port) => port.set_baud_rate(baud),
            Link::Fake(modem) => modem.set_baud_rate(baud),
        }
    }

    fn baud_rate(&self) -> u32 {
        match self {
            Link::Serial(port) => port.baud_rate(),
            Link::Fake(modem) => modem.baud_rate(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Link::Serial(port) => port.name(),
            Link::Fake(modem) => modem.name(),
        }
    }

    fn discard_input(&self) -> cellmux_transport::Result<usize> {
        match self {
            Link::Serial(port) => port.discard_input(),
            Link::Fake(modem) => modem.discard_input(),
        }
    }
}

pub fn open(args: &DeviceArgs) -> CliResult<Arc<Link>> {
    if args.fake {
        let modem = ModemEmulator::new(EmulatorOptions::default()).into_fake();
        modem
            .set_baud_rate(args.baud)
            .map_err(|err| transport_error("fake modem", err))?;
        return Ok(Arc::new(Link::Fake(modem)));
    }

    let device = args
        .device
        .as_deref()
        .ok_or_else(|| CliError::new(USAGE, "a device path or --fake is required"))?;
    SerialTransport::open(device, args.baud, args.flow_control)
        .map(|port| Arc::new(Link::Serial(port)))
        .map_err(|err: TransportError| transport_error(&format!("open {device}"), err))
}

pub fn controller(args: &DeviceArgs, config: MuxConfig) -> CliResult<MuxController<Link>> {
    let link = open(args)?;
    MuxController::new(link, config).map_err(|err| mux_error("controller setup failed", err))
}

/// Detect, configure and multiplex. Returns the line speed in use.
pub fn bring_up(mux: &MuxController<Link>, args: &BringUpArgs) -> CliResult<u32> {
    let baud = if args.no_detect {
        mux.transport().baud_rate()
    } else {
        let timeout = parse_duration(&args.detect_timeout)?;
        mux.baud_detect(timeout)
            .map_err(|err| mux_error("baud detection failed", err))?
    };
    info!(baud, "modem reachable");

    if !args.no_configure {
        mux.configure()
            .map_err(|err| mux_error("modem configuration failed", err))?;
    }

    mux.start_multiplexer()
        .map_err(|err| mux_error("multiplexer startup failed", err))?;

    if args.audio {
        mux.audio_configure()
            .map_err(|err| mux_error("audio configuration", err))?;
    }
    Ok(mux.transport().baud_rate())
}
