mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "cellmux",
    version,
    about = "GSM 07.10 multiplexer for cellular modems"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "CELLMUX_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    /// JSON configuration file; missing fields keep their defaults.
    #[arg(long, value_name = "FILE", env = "CELLMUX_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format, cli.config.as_deref());

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_with_device() {
        let cli = Cli::try_parse_from(["cellmux", "start", "/dev/ttyUSB2", "--no-detect"])
            .expect("start args should parse");
        match cli.command {
            Command::Start(args) => {
                assert_eq!(args.device.device.as_deref(), Some("/dev/ttyUSB2"));
                assert_eq!(args.device.baud, 115_200);
                assert!(args.bring_up.no_detect);
                assert!(!args.bring_up.audio);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fake_replaces_device() {
        let cli = Cli::try_parse_from(["cellmux", "probe", "--fake", "--timeout", "2s"])
            .expect("probe --fake should parse");
        assert!(matches!(cli.command, Command::Probe(_)));
    }

    #[test]
    fn device_required_without_fake() {
        let err = Cli::try_parse_from(["cellmux", "monitor"]).expect_err("device is required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn at_takes_several_commands() {
        let cli = Cli::try_parse_from(["cellmux", "at", "--fake", "ATI", "AT+CSQ"])
            .expect("at args should parse");
        match cli.command {
            Command::At(args) => assert_eq!(args.commands, vec!["ATI", "AT+CSQ"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cellmux",
            "decode",
            "F9 03 3F 01 1C F9",
            "--format",
            "json",
            "--config",
            "/etc/cellmux.json",
        ])
        .expect("global flags should parse");
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/cellmux.json")));
    }
}
