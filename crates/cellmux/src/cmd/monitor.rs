use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use cellmux_frame::ChannelRole;
use cellmux_mux::{urc_frame, MuxConfig};

use crate::cmd::link::{bring_up, controller, Link};
use crate::cmd::MonitorArgs;
use crate::exit::{mux_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_urc, OutputFormat};

const POLL: Duration = Duration::from_millis(200);

pub fn run(args: MonitorArgs, config: MuxConfig, format: OutputFormat) -> CliResult<i32> {
    let mux = controller(&args.device, config)?;
    bring_up(&mux, &args.bring_up)?;

    let notifications = mux
        .get(ChannelRole::Notifications)
        .ok_or_else(|| CliError::new(FAILURE, "notifications channel not open"))?;

    let (tx, rx) = mpsc::channel::<String>();
    notifications.set_async_callback(move |payload| {
        for line in String::from_utf8_lossy(payload).split(['\r', '\n']) {
            let line = line.trim();
            if !line.is_empty() {
                let _ = tx.send(line.to_string());
            }
        }
    });

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    // The emulator has no radio behind it; hand it one URC to report.
    if let Link::Fake(modem) = mux.transport().as_ref() {
        modem.inject(&urc_frame("\r\n+QIND: \"csq\",20,99\r\n"));
    }

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        if let Some(err) = mux.last_error() {
            return Err(CliError::new(crate::exit::TRANSPORT_ERROR, err));
        }
        match rx.recv_timeout(POLL) {
            Ok(line) => {
                print_urc(&line, format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    notifications.clear_async_callback();
    mux.close_channels()
        .map_err(|err| mux_error("close-down failed", err))?;
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
