use cellmux_mux::MuxConfig;

use crate::cmd::link::{bring_up, controller};
use crate::cmd::StartArgs;
use crate::exit::{mux_error, CliResult, SUCCESS};
use crate::output::{print_session, OutputFormat};

pub fn run(args: StartArgs, config: MuxConfig, format: OutputFormat) -> CliResult<i32> {
    let mux = controller(&args.device, config)?;
    let baud = bring_up(&mux, &args.bring_up)?;

    print_session(
        baud,
        &mux.channel_info(),
        mux.signal_strength(),
        mux.demux_stats(),
        format,
    );

    mux.close_channels()
        .map_err(|err| mux_error("close-down failed", err))?;
    Ok(SUCCESS)
}
