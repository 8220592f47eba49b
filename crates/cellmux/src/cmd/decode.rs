use cellmux_frame::{decode, parse_hex, Compat, FrameStatus};

use crate::cmd::DecodeArgs;
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex)
        .ok_or_else(|| CliError::new(USAGE, format!("not hex: {}", args.hex)))?;
    let compat = if args.strict {
        Compat::strict()
    } else {
        Compat::default()
    };

    let frame = decode(&bytes, compat);
    print_frame(&frame, format);
    Ok(if frame.status == FrameStatus::Ok {
        SUCCESS
    } else {
        DATA_INVALID
    })
}
