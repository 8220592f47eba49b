#![cfg(feature = "cli")]

use std::path::PathBuf;
use std::process::{Command, Output};

fn cellmux(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cellmux"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .output()
        .expect("cellmux should run")
}

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "cellmux-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

#[test]
fn decode_prints_frame_fields() {
    let output = cellmux(&["--format", "json", "decode", "F9 07 3F 01 DE F9"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).expect("json output");
    assert_eq!(value["dlci"], 1);
    assert_eq!(value["kind"], "SABM");
    assert_eq!(value["command"], true);
    assert_eq!(value["status"], "Ok");
}

#[test]
fn decode_bad_checksum_returns_60() {
    let output = cellmux(&["--format", "json", "decode", "F9 07 3F 01 DD F9"]);
    assert_eq!(output.status.code(), Some(60));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ChecksumError"));
}

#[test]
fn decode_rejects_non_hex() {
    let output = cellmux(&["decode", "not-hex"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_names_binary() {
    let output = cellmux(&["version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("cellmux "));
}

#[test]
fn start_against_emulator_lists_active_channels() {
    let output = cellmux(&["--format", "json", "start", "--fake", "--no-detect"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).expect("json output");
    let channels = value["channels"].as_array().expect("channels array");
    assert_eq!(channels.len(), 4);
    assert!(channels.iter().all(|c| c["state"] == "active"));
    assert_eq!(value["signal"]["rssi"], 20);
    assert_eq!(value["baud"], 115_200);
}

#[test]
fn monitor_prints_notification_and_exits_on_count() {
    let output = cellmux(&[
        "--format",
        "raw",
        "monitor",
        "--fake",
        "--no-detect",
        "--no-configure",
        "--count",
        "1",
    ]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("+QIND: \"csq\",20,99"));
}

#[test]
fn at_prints_reply_lines() {
    let output = cellmux(&["--format", "raw", "at", "--fake", "ATI"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Quectel"));
    assert!(stdout.contains("OK"));
}

#[test]
fn invalid_config_is_a_usage_error() {
    let dir = unique_temp_dir("config");
    let path = dir.join("cellmux.json");
    std::fs::write(&path, "{ \"mux\": { \"max_frame_size\": 0 } }").expect("write config");

    let output = cellmux(&[
        "--config",
        path.to_str().expect("utf-8 path"),
        "start",
        "--fake",
    ]);
    assert_eq!(output.status.code(), Some(64));

    let _ = std::fs::remove_dir_all(&dir);
}
