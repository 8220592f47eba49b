use cellmux_mux::MuxConfig;
use serde::Serialize;

use crate::cmd::link::controller;
use crate::cmd::{parse_duration, ProbeArgs};
use crate::exit::{mux_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct ProbeOutput<'a> {
    device: &'a str,
    baud: u32,
}

pub fn run(args: ProbeArgs, config: MuxConfig, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let mux = controller(&args.device, config)?;
    let baud = mux
        .baud_detect(timeout)
        .map_err(|err| mux_error("baud detection failed", err))?;

    let device = args.device.device.as_deref().unwrap_or("fake");
    match format {
        OutputFormat::Json => print_json(&ProbeOutput { device, baud }),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("{device}: modem answers at {baud} baud");
        }
        OutputFormat::Raw => println!("{baud}"),
    }
    Ok(SUCCESS)
}
