//! URC monitor example: print unsolicited result codes from the
//! Notifications channel while AT commands run on the Commands channel.
//!
//! Run with:
//!   cargo run --example urc-monitor

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use cellmux::frame::ChannelRole;
use cellmux::mux::{urc_frame, ModemEmulator, MuxConfig, MuxController};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let modem = Arc::new(ModemEmulator::default().into_fake());
    let mux = MuxController::new(Arc::clone(&modem), MuxConfig::default())?;
    mux.baud_detect(Duration::from_secs(5))?;
    mux.start_multiplexer()?;

    let (tx, rx) = mpsc::channel();
    let notifications = mux
        .get(ChannelRole::Notifications)
        .ok_or("notifications channel missing")?;
    notifications.set_async_callback(move |payload| {
        let _ = tx.send(String::from_utf8_lossy(payload).trim().to_string());
    });

    // An incoming call and a signal report, as the modem would send them.
    modem.inject(&urc_frame("\r\nRING\r\n"));
    modem.inject(&urc_frame("\r\n+QIND: \"csq\",18,99\r\n"));

    // Commands keep working while URCs arrive.
    let commands = mux
        .get(ChannelRole::Commands)
        .ok_or("commands channel missing")?;
    let reply = commands.send_command("ATI\r", 0, Duration::from_secs(1))?;
    eprintln!("[commands] {:?}", reply.lines);

    for _ in 0..2 {
        let urc = rx.recv_timeout(Duration::from_secs(1))?;
        eprintln!("[notifications] {urc}");
    }

    mux.close_channels()?;
    Ok(())
}
