use std::path::Path;
use std::time::Duration;

use cellmux_mux::MuxConfig;
use clap::{Args, Subcommand};

use crate::exit::{mux_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod at;
pub mod decode;
pub mod link;
pub mod monitor;
pub mod probe;
pub mod start;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find the line speed the modem answers on.
    Probe(ProbeArgs),
    /// Send plain-mode AT commands and print the replies.
    At(AtArgs),
    /// Bring the modem up, start the multiplexer and print the channels.
    Start(StartArgs),
    /// Start the multiplexer and print unsolicited result codes.
    Monitor(MonitorArgs),
    /// Decode one frame from hex text.
    Decode(DecodeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: Option<&Path>) -> CliResult<i32> {
    match command {
        Command::Probe(args) => probe::run(args, load_config(config)?, format),
        Command::At(args) => at::run(args, load_config(config)?, format),
        Command::Start(args) => start::run(args, load_config(config)?, format),
        Command::Monitor(args) => monitor::run(args, load_config(config)?, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<MuxConfig> {
    match path {
        Some(path) => MuxConfig::from_json_file(path)
            .map_err(|err| mux_error(&format!("config {}", path.display()), err)),
        None => Ok(MuxConfig::default()),
    }
}

#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// Serial device of the modem (e.g. /dev/ttyUSB2).
    #[arg(required_unless_present = "fake")]
    pub device: Option<String>,
    /// Line speed to open the device at.
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,
    /// Enable RTS/CTS hardware flow control.
    #[arg(long)]
    pub flow_control: bool,
    /// Talk to an emulated modem instead of a device.
    #[arg(long)]
    pub fake: bool,
}

#[derive(Args, Debug)]
pub struct BringUpArgs {
    /// Keep the line speed given by --baud instead of detecting it.
    #[arg(long)]
    pub no_detect: bool,
    /// Skip the AT configuration sequence.
    #[arg(long)]
    pub no_configure: bool,
    /// Configure the digital audio path after startup.
    #[arg(long)]
    pub audio: bool,
    /// Overall baud detection timeout (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub detect_timeout: String,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Overall detection timeout (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct AtArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Commands to send, in order. A trailing CR is added when missing.
    #[arg(required = true, num_args = 1..)]
    pub commands: Vec<String>,
    /// Per-command reply timeout (e.g. 1s, 300ms).
    #[arg(long, default_value = "1s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    #[command(flatten)]
    pub bring_up: BringUpArgs,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    #[command(flatten)]
    pub bring_up: BringUpArgs,
    /// Exit after printing N notifications.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame bytes as hex; spaces, commas and 0x prefixes are ignored.
    pub hex: String,
    /// Verify every checksum and treat a 0xFF length as 127 bytes.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
