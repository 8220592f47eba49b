use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use cellmux_frame::{dlci_name, hex_dump, DemuxStats, Frame};
use cellmux_mux::{ChannelInfo, SignalStrength};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

#[derive(Serialize)]
struct SessionOutput<'a> {
    baud: u32,
    channels: &'a [ChannelInfo],
    signal: Option<SignalStrength>,
    demux: DemuxStats,
}

pub fn print_session(
    baud: u32,
    channels: &[ChannelInfo],
    signal: Option<SignalStrength>,
    demux: DemuxStats,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json(&SessionOutput {
            baud,
            channels,
            signal,
            demux,
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["DLCI", "CHANNEL", "STATE", "TX", "DELIVERED", "DROPPED"]);
            for c in channels {
                table.add_row(vec![
                    c.dlci.to_string(),
                    c.name.to_string(),
                    c.state.to_string(),
                    if c.sending_allowed { "on" } else { "off" }.to_string(),
                    c.stats.delivered.to_string(),
                    c.stats.dropped.to_string(),
                ]);
            }
            println!("{table}");
            println!("baud: {baud}  signal: {}", signal_text(signal));
            println!("{}", demux_text(&demux));
        }
        OutputFormat::Pretty => {
            println!("Multiplexer session:");
            println!("  Baud:    {baud}");
            println!("  Signal:  {}", signal_text(signal));
            println!("  Frames:  {}", demux_text(&demux));
            for c in channels {
                println!(
                    "  DLCI {} ({}): {} tx={} delivered={} dropped={}",
                    c.dlci,
                    c.name,
                    c.state,
                    c.sending_allowed,
                    c.stats.delivered,
                    c.stats.dropped
                );
            }
        }
        OutputFormat::Raw => println!("{baud}"),
    }
}

fn demux_text(stats: &DemuxStats) -> String {
    format!(
        "frames={} bad_flags={} checksum_errors={} overruns={}",
        stats.frames, stats.bad_flags, stats.checksum_errors, stats.overruns
    )
}

fn signal_text(signal: Option<SignalStrength>) -> String {
    match signal {
        Some(SignalStrength { dbm: Some(dbm), rssi }) => format!("{dbm} dBm (rssi {rssi})"),
        Some(SignalStrength { rssi, .. }) => format!("unknown (rssi {rssi})"),
        None => "not read".to_string(),
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    dlci: u8,
    channel: &'a str,
    kind: Option<&'a str>,
    command: bool,
    poll_final: bool,
    control: u8,
    fcs: u8,
    status: String,
    payload_size: usize,
    payload: String,
}

pub fn print_frame(frame: &Frame, format: OutputFormat) {
    let kind = frame.frame_type().map(|k| k.name());
    match format {
        OutputFormat::Json => print_json(&FrameOutput {
            dlci: frame.dlci(),
            channel: dlci_name(frame.dlci()),
            kind,
            command: frame.is_command(),
            poll_final: frame.poll_final(),
            control: frame.control,
            fcs: frame.fcs,
            status: format!("{:?}", frame.status),
            payload_size: frame.payload.len(),
            payload: hex_dump(&frame.payload),
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["DLCI", "CHANNEL", "TYPE", "C/R", "P/F", "FCS", "STATUS", "PAYLOAD"]);
            table.add_row(vec![
                frame.dlci().to_string(),
                dlci_name(frame.dlci()).to_string(),
                kind.unwrap_or("?").to_string(),
                u8::from(frame.is_command()).to_string(),
                u8::from(frame.poll_final()).to_string(),
                format!("0x{:02X}", frame.fcs),
                format!("{:?}", frame.status),
                hex_dump(&frame.payload),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "dlci={} ({}) type={} cr={} pf={} fcs=0x{:02X} status={:?} payload={}",
                frame.dlci(),
                dlci_name(frame.dlci()),
                kind.unwrap_or("?"),
                frame.is_command(),
                frame.poll_final(),
                frame.fcs,
                frame.status,
                hex_dump(&frame.payload)
            );
        }
        OutputFormat::Raw => print_raw(&frame.payload),
    }
}

#[derive(Serialize)]
struct UrcOutput<'a> {
    channel: &'a str,
    text: &'a str,
    timestamp: String,
}

pub fn print_urc(text: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&UrcOutput {
            channel: "Notifications",
            text,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table | OutputFormat::Pretty => println!("[{}] {text}", now_unix_seconds()),
        OutputFormat::Raw => println!("{text}"),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
