use cellmux_mux::{AtResponse, MuxConfig};
use serde::Serialize;

use crate::cmd::link::controller;
use crate::cmd::{parse_duration, AtArgs};
use crate::exit::{mux_error, CliResult, FAILURE, SUCCESS};
use crate::output::{new_table, print_json, OutputFormat};

#[derive(Serialize)]
struct Exchange<'a> {
    command: &'a str,
    #[serde(flatten)]
    response: &'a AtResponse,
}

pub fn run(args: AtArgs, config: MuxConfig, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let mux = controller(&args.device, config)?;

    let mut all_ok = true;
    let mut table = new_table(vec!["COMMAND", "OUTCOME", "LINES"]);
    for command in &args.commands {
        let text = with_cr(command);
        let response = mux
            .at_command(&text, 0, timeout)
            .map_err(|err| mux_error(&format!("{command} failed"), err))?;
        all_ok &= response.is_ok();

        match format {
            OutputFormat::Json => print_json(&Exchange {
                command,
                response: &response,
            }),
            OutputFormat::Table => {
                table.add_row(vec![
                    command.clone(),
                    format!("{:?}", response.outcome),
                    response.lines.join("\n"),
                ]);
            }
            OutputFormat::Pretty => {
                println!("> {command}");
                for line in &response.lines {
                    println!("  {line}");
                }
            }
            OutputFormat::Raw => {
                for line in &response.lines {
                    println!("{line}");
                }
            }
        }
    }
    if matches!(format, OutputFormat::Table) {
        println!("{table}");
    }

    Ok(if all_ok { SUCCESS } else { FAILURE })
}

fn with_cr(command: &str) -> String {
    let trimmed = command.trim_end_matches(['\r', '\n']);
    format!("{trimmed}\r")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_end_in_one_cr() {
        assert_eq!(with_cr("AT"), "AT\r");
        assert_eq!(with_cr("AT+CSQ\r\n"), "AT+CSQ\r");
    }
}
