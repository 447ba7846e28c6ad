use std::{fs::read_to_string, net::IpAddr, time::Duration};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

fn jitter_window_control_ms() -> u64 {
    100
}

fn jitter_window_audio_ms() -> u64 {
    300
}

fn retx_keep_multiplier() -> u32 {
    10
}

fn ping_interval_ms() -> u64 {
    100
}

fn ping_timeout_ms() -> u64 {
    3_000
}

fn handshake_timeout_ms() -> u64 {
    1_000
}

fn audio_inactivity_timeout_ms() -> u64 {
    5_000
}

fn status_log_interval_secs() -> u64 {
    5
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Timing {
    ///
    /// Jitter window used by the control and serial streams' reorder buffers.
    ///
    #[serde(default = "jitter_window_control_ms")]
    pub jitter_window_control_ms: u64,
    ///
    /// Jitter window used by the audio stream's reorder buffer. Wider than
    /// the control/serial window to tolerate the larger jitter budget audio
    /// playback can absorb.
    ///
    #[serde(default = "jitter_window_audio_ms")]
    pub jitter_window_audio_ms: u64,
    ///
    /// How long a transmitted tracked packet stays available for
    /// retransmission, expressed as a multiple of the stream's jitter window.
    ///
    #[serde(default = "retx_keep_multiplier")]
    pub retx_keep_multiplier: u32,
    #[serde(default = "ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    #[serde(default = "handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "audio_inactivity_timeout_ms")]
    pub audio_inactivity_timeout_ms: u64,
    #[serde(default = "status_log_interval_secs")]
    pub status_log_interval_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            jitter_window_control_ms: jitter_window_control_ms(),
            jitter_window_audio_ms: jitter_window_audio_ms(),
            retx_keep_multiplier: retx_keep_multiplier(),
            ping_interval_ms: ping_interval_ms(),
            ping_timeout_ms: ping_timeout_ms(),
            handshake_timeout_ms: handshake_timeout_ms(),
            audio_inactivity_timeout_ms: audio_inactivity_timeout_ms(),
            status_log_interval_secs: status_log_interval_secs(),
        }
    }
}

impl Timing {
    pub fn jitter_window_control(&self) -> Duration {
        Duration::from_millis(self.jitter_window_control_ms)
    }

    pub fn jitter_window_audio(&self) -> Duration {
        Duration::from_millis(self.jitter_window_audio_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn audio_inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_inactivity_timeout_ms)
    }

    pub fn status_log_interval(&self) -> Duration {
        Duration::from_secs(self.status_log_interval_secs)
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Auth {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Radio {
    ///
    /// Address of the radio to connect to.
    ///
    pub host: IpAddr,
    #[serde(default = "Radio::control_port")]
    pub control_port: u16,
    #[serde(default = "Radio::serial_port")]
    pub serial_port: u16,
    #[serde(default = "Radio::audio_port")]
    pub audio_port: u16,
    ///
    /// CAT address byte sent during login, identifying which virtual serial
    /// port on the radio to attach to.
    ///
    #[serde(default = "Radio::cat_address")]
    pub cat_address: u8,
}

impl Radio {
    fn control_port() -> u16 {
        50001
    }

    fn serial_port() -> u16 {
        50002
    }

    fn audio_port() -> u16 {
        50003
    }

    fn cat_address() -> u8 {
        0
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Local {
    ///
    /// Enables creating a virtual serial (pty) device exposing the radio's
    /// CAT port locally.
    ///
    #[serde(default)]
    pub virtual_serial: bool,
    ///
    /// TCP port on which CAT bytes are also exposed for external clients.
    ///
    #[serde(default = "Local::serial_tcp_port")]
    pub serial_tcp_port: u16,
    ///
    /// TCP port for a rigctld-compatible control shim.
    ///
    #[serde(default = "Local::rigctld_port")]
    pub rigctld_port: u16,
    ///
    /// Switches the radio to data mode automatically whenever PTT engages.
    ///
    #[serde(default)]
    pub automatic_data_mode_on_tx: bool,
    ///
    /// Shell command executed once the session is fully connected.
    ///
    #[serde(default)]
    pub exec_on_connect: Option<String>,
}

impl Local {
    fn serial_tcp_port() -> u16 {
        4533
    }

    fn rigctld_port() -> u16 {
        4532
    }
}

impl Default for Local {
    fn default() -> Self {
        Self {
            virtual_serial: false,
            serial_tcp_port: Self::serial_tcp_port(),
            rigctld_port: Self::rigctld_port(),
            automatic_data_mode_on_tx: false,
            exec_on_connect: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub radio: Radio,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub local: Local,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    ///
    /// Path to the json5 configuration file.
    ///
    /// Example: catlink --config /etc/catlink/config.json5
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Loads configuration from the file named on the command line.
    ///
    pub fn load() -> Result<Self> {
        Ok(serde_json5::from_str::<Self>(&read_to_string(
            &Cli::parse().config,
        )?)?)
    }
}
