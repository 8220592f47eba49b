use std::path::Path;
use std::time::Duration;

pub use cellmux_frame::Compat;
use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};

/// UART speeds the modem's `AT+CMUX` port-speed field can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum PortSpeed {
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
    B230400,
    B460800,
}

impl PortSpeed {
    pub const ALL: [PortSpeed; 7] = [
        PortSpeed::B9600,
        PortSpeed::B19200,
        PortSpeed::B38400,
        PortSpeed::B57600,
        PortSpeed::B115200,
        PortSpeed::B230400,
        PortSpeed::B460800,
    ];

    pub const fn baud(self) -> u32 {
        match self {
            PortSpeed::B9600 => 9_600,
            PortSpeed::B19200 => 19_200,
            PortSpeed::B38400 => 38_400,
            PortSpeed::B57600 => 57_600,
            PortSpeed::B115200 => 115_200,
            PortSpeed::B230400 => 230_400,
            PortSpeed::B460800 => 460_800,
        }
    }

    /// Value of the `<portspeed>` field of `AT+CMUX`.
    pub const fn cmux_code(self) -> u8 {
        match self {
            PortSpeed::B9600 => 1,
            PortSpeed::B19200 => 2,
            PortSpeed::B38400 => 3,
            PortSpeed::B57600 => 4,
            PortSpeed::B115200 => 5,
            PortSpeed::B230400 => 6,
            PortSpeed::B460800 => 7,
        }
    }

    pub const fn from_baud(baud: u32) -> Option<Self> {
        match baud {
            9_600 => Some(PortSpeed::B9600),
            19_200 => Some(PortSpeed::B19200),
            38_400 => Some(PortSpeed::B38400),
            57_600 => Some(PortSpeed::B57600),
            115_200 => Some(PortSpeed::B115200),
            230_400 => Some(PortSpeed::B230400),
            460_800 => Some(PortSpeed::B460800),
            _ => None,
        }
    }
}

impl TryFrom<u32> for PortSpeed {
    type Error = String;

    fn try_from(baud: u32) -> std::result::Result<Self, Self::Error> {
        PortSpeed::from_baud(baud).ok_or_else(|| format!("unsupported port speed {baud}"))
    }
}

impl From<PortSpeed> for u32 {
    fn from(speed: PortSpeed) -> Self {
        speed.baud()
    }
}

impl std::fmt::Display for PortSpeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.baud())
    }
}

/// Global values sent in `AT+CMUX=`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxParameters {
    /// Line speed to request. `None` keeps the speed baud detection found.
    pub port_speed: Option<PortSpeed>,
    /// N1, in bytes.
    pub max_frame_size: u16,
    /// T1, in centiseconds.
    pub ack_timer: u8,
    /// N2.
    pub max_retransmissions: u8,
    /// T2, in centiseconds.
    pub control_response_timer: u8,
    /// T3, in seconds.
    pub wakeup_timer: u8,
    /// k.
    pub error_recovery_window: u8,
}

impl Default for MuxParameters {
    fn default() -> Self {
        Self {
            port_speed: None,
            max_frame_size: 127,
            ack_timer: 10,
            max_retransmissions: 3,
            control_response_timer: 30,
            wakeup_timer: 10,
            error_recovery_window: 2,
        }
    }
}

impl MuxParameters {
    /// The `AT+CMUX` command text for basic option, UIH subset.
    pub fn cmux_command(&self, speed: PortSpeed) -> String {
        format!(
            "AT+CMUX=0,0,{},{},{},{},{},{},{}\r",
            speed.cmux_code(),
            self.max_frame_size,
            self.ack_timer,
            self.max_retransmissions,
            self.control_response_timer,
            self.wakeup_timer,
            self.error_recovery_window
        )
    }
}

/// Per-DLCI values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelParameters {
    pub convergence_layer: u8,
    pub priority: u8,
    pub ack_timer_ms: u64,
    pub max_frame_size: u16,
    /// SABM attempts before giving up.
    pub max_retransmissions: u8,
    pub window_size: u8,
    /// Wait for UA after each SABM or DISC.
    pub establish_timeout_ms: u64,
}

impl Default for ChannelParameters {
    fn default() -> Self {
        Self {
            convergence_layer: 1,
            priority: 0,
            ack_timer_ms: 100,
            max_frame_size: 128,
            max_retransmissions: 3,
            window_size: 2,
            establish_timeout_ms: 300,
        }
    }
}

impl ChannelParameters {
    pub fn establish_timeout(&self) -> Duration {
        Duration::from_millis(self.establish_timeout_ms)
    }
}

/// AT text sent to the modem. Every entry can be overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemCommands {
    pub at: String,
    pub flow_control_on: String,
    pub factory_reset: String,
    pub echo_off: String,
    pub sw_info: String,
    pub modem_init: Vec<String>,
    /// Retried until it succeeds or the configure deadline passes.
    pub sleep_clock_on: String,
    pub set_urc_channel: String,
    pub signal_quality: String,
    pub audio_query: String,
    /// Answer to `audio_query` when the audio path is already set up.
    pub audio_expected: String,
    pub audio_init: String,
    pub audio_setup: Vec<String>,
}

impl Default for ModemCommands {
    fn default() -> Self {
        Self {
            at: "AT\r".into(),
            flow_control_on: "AT+IFC=2,2\r".into(),
            factory_reset: "AT&F\r".into(),
            echo_off: "ATE0\r".into(),
            sw_info: "ATI\r".into(),
            modem_init: vec![
                "AT+QCFG=\"urc/ri/ring\",\"off\"\r".into(),
                "AT+QCFG=\"urc/ri/smsincoming\",\"off\"\r".into(),
                "AT+QCFG=\"apready\",1,1,200\r".into(),
                "AT+QINDCFG=\"csq\",1\r".into(),
                "AT+CRC=1\r".into(),
                "AT+CLIP=1\r".into(),
            ],
            sleep_clock_on: "AT+QSCLK=1\r".into(),
            set_urc_channel: "AT+QCFG=\"cmux/urcport\",2\r".into(),
            signal_quality: "AT+CSQ\r".into(),
            audio_query: "AT+QDAI?\r".into(),
            audio_expected: "+QDAI: 1,0,0,3,0,1,1,1".into(),
            audio_init: "AT+QDAI=1,0,0,3,0,1,1,1\r".into(),
            audio_setup: vec![
                "AT+QRXGAIN=40000\r".into(),
                "AT+CLVL=3\r".into(),
                "AT+QMIC=15000,15000\r".into(),
                "AT+QEEC=0,2048\r".into(),
                "AT+QEEC=5,14\r".into(),
            ],
        }
    }
}

/// Everything a [`MuxController`](crate::MuxController) needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    pub mux: MuxParameters,
    pub channel: ChannelParameters,
    pub commands: ModemCommands,
    pub compat: Compat,
    pub command_timeout_ms: u64,
    pub baud_detect_timeout_ms: u64,
    /// Pause after sending close-down so the modem leaves CMUX.
    pub cmux_close_delay_ms: u64,
    pub configure_retry_interval_ms: u64,
    pub configure_deadline_ms: u64,
    /// Frames held for a caller awaiting a response.
    pub response_buffer_capacity: usize,
    /// Receive wait between shutdown checks.
    pub poll_interval_ms: u64,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            mux: MuxParameters::default(),
            channel: ChannelParameters::default(),
            commands: ModemCommands::default(),
            compat: Compat::default(),
            command_timeout_ms: 1_000,
            baud_detect_timeout_ms: 30_000,
            cmux_close_delay_ms: 1_000,
            configure_retry_interval_ms: 1_000,
            configure_deadline_ms: 30_000,
            response_buffer_capacity: 32,
            poll_interval_ms: 20,
        }
    }
}

impl MuxConfig {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mux.max_frame_size == 0 {
            return Err(MuxError::Config("mux.max_frame_size must be at least 1".into()));
        }
        if usize::from(self.mux.max_frame_size) > cellmux_frame::MAX_PAYLOAD {
            return Err(MuxError::Config(format!(
                "mux.max_frame_size {} exceeds {}",
                self.mux.max_frame_size,
                cellmux_frame::MAX_PAYLOAD
            )));
        }
        if self.channel.max_retransmissions == 0 {
            return Err(MuxError::Config(
                "channel.max_retransmissions must be at least 1".into(),
            ));
        }
        if self.response_buffer_capacity == 0 {
            return Err(MuxError::Config(
                "response_buffer_capacity must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(MuxError::Config("poll_interval_ms must be at least 1".into()));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn baud_detect_timeout(&self) -> Duration {
        Duration::from_millis(self.baud_detect_timeout_ms)
    }

    pub fn cmux_close_delay(&self) -> Duration {
        Duration::from_millis(self.cmux_close_delay_ms)
    }

    pub fn configure_retry_interval(&self) -> Duration {
        Duration::from_millis(self.configure_retry_interval_ms)
    }

    pub fn configure_deadline(&self) -> Duration {
        Duration::from_millis(self.configure_deadline_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmux_command_uses_defaults() {
        let params = MuxParameters::default();
        assert_eq!(
            params.cmux_command(PortSpeed::B460800),
            "AT+CMUX=0,0,7,127,10,3,30,10,2\r"
        );
        assert_eq!(
            params.cmux_command(PortSpeed::B115200),
            "AT+CMUX=0,0,5,127,10,3,30,10,2\r"
        );
    }

    #[test]
    fn speed_codes() {
        let codes: Vec<u8> = PortSpeed::ALL.iter().map(|s| s.cmux_code()).collect();
        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6, 7]);
        for speed in PortSpeed::ALL {
            assert_eq!(PortSpeed::from_baud(speed.baud()), Some(speed));
        }
        assert_eq!(PortSpeed::from_baud(921_600), None);
    }

    #[test]
    fn channel_defaults() {
        let params = ChannelParameters::default();
        assert_eq!(params.ack_timer_ms, 100);
        assert_eq!(params.max_frame_size, 128);
        assert_eq!(params.max_retransmissions, 3);
        assert_eq!(params.window_size, 2);
        assert_eq!(params.establish_timeout(), Duration::from_millis(300));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = MuxConfig::from_json_str(
            r#"{
                "mux": { "port_speed": 460800 },
                "compat": { "length_ff_quirk": false },
                "command_timeout_ms": 250
            }"#,
        )
        .unwrap();
        assert_eq!(config.mux.port_speed, Some(PortSpeed::B460800));
        assert_eq!(config.mux.max_frame_size, 127);
        assert!(!config.compat.length_ff_quirk);
        assert!(config.compat.trust_ua_fcs);
        assert_eq!(config.command_timeout(), Duration::from_millis(250));
        assert_eq!(config.commands.at, "AT\r");
    }

    #[test]
    fn bad_speed_is_rejected() {
        let err = MuxConfig::from_json_str(r#"{ "mux": { "port_speed": 1234 } }"#).unwrap_err();
        assert!(matches!(err, MuxError::Json(_)));
    }

    #[test]
    fn zero_retransmissions_is_rejected() {
        let err =
            MuxConfig::from_json_str(r#"{ "channel": { "max_retransmissions": 0 } }"#).unwrap_err();
        assert!(matches!(err, MuxError::Config(_)));
    }
}
