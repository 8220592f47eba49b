//! Bring-up example: detect, configure and multiplex an emulated modem.
//!
//! Run with:
//!   cargo run --example bring-up
//!
//! Pass a device path to use real hardware instead:
//!   cargo run --example bring-up -- /dev/ttyUSB2

use std::sync::Arc;
use std::time::Duration;

use cellmux::frame::ChannelRole;
use cellmux::mux::{ModemEmulator, MuxConfig, MuxController};
use cellmux::transport::{SerialTransport, Transport};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(device) => run(Arc::new(SerialTransport::open(&device, 115_200, false)?)),
        None => run(Arc::new(ModemEmulator::default().into_fake())),
    }
}

fn run<T: Transport>(link: Arc<T>) -> Result<(), Box<dyn std::error::Error>> {
    let mux = MuxController::new(link, MuxConfig::default())?;

    let baud = mux.baud_detect(Duration::from_secs(30))?;
    eprintln!("[host] modem answers at {baud} baud");

    mux.configure()?;
    mux.start_multiplexer()?;
    eprintln!("[host] mode: {}", mux.mode());

    let commands = mux
        .get(ChannelRole::Commands)
        .ok_or("commands channel missing")?;
    let reply = commands.send_command("AT+CSQ\r", 0, Duration::from_secs(1))?;
    eprintln!("[host] AT+CSQ -> {:?}", reply.lines);

    for channel in mux.channel_info() {
        eprintln!(
            "[host] DLCI {} {:<13} {}",
            channel.dlci, channel.name, channel.state
        );
    }

    mux.close_channels()?;
    eprintln!("[host] mode: {}", mux.mode());
    Ok(())
}
