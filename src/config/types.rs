use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Root configuration for revlistd
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listener bind and session behaviour
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Where session commands come from
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Bind address
    #[serde(default = "default_address")]
    pub address: IpAddr,

    /// Bind port (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// What to do with accepted connections
    #[serde(default)]
    pub mode: ListenerMode,

    /// Close each session after a single command/response cycle
    #[serde(default = "default_true")]
    pub once: bool,

    /// Bound on each receive within a session
    #[serde(default = "default_recv_timeout", with = "humantime_serde")]
    pub recv_timeout: Duration,

    /// Bound on each accept wait, so the loop can notice shutdown
    #[serde(default = "default_accept_timeout", with = "humantime_serde")]
    pub accept_timeout: Duration,

    /// Pause between turns in continuous mode
    #[serde(default = "default_turn_delay", with = "humantime_serde")]
    pub turn_delay: Duration,

    /// Maximum bytes per receive call
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer: usize,

    /// How the end of a response turn is detected
    #[serde(default)]
    pub termination: TurnTermination,

    /// How raw response bytes are turned into text
    #[serde(default)]
    pub decode: DecodePolicy,
}

impl ListenerConfig {
    /// Socket address to bind.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            mode: ListenerMode::default(),
            once: true,
            recv_timeout: default_recv_timeout(),
            accept_timeout: default_accept_timeout(),
            turn_delay: default_turn_delay(),
            recv_buffer: default_recv_buffer(),
            termination: TurnTermination::default(),
            decode: DecodePolicy::default(),
        }
    }
}

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    8999
}

fn default_recv_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_accept_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_turn_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_recv_buffer() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

/// Listener mode
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListenerMode {
    /// Drive every connection with a command/response session
    #[default]
    Interactive,
    /// Park connections for one-shot payload injection
    Stage,
}

/// Turn termination strategy
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum TurnTermination {
    /// Stop when a raw chunk repeats the previous one byte for byte
    #[default]
    EchoDuplicate,
    /// Stop only when a receive times out
    IdleTimeout,
    /// Stop once the cleaned turn output contains the marker
    Sentinel { marker: String },
}

/// Decode policy for response chunks
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Invalid UTF-8 closes the session with an error
    #[default]
    Strict,
    /// Invalid bytes become U+FFFD
    Lossy,
}

/// Command source configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandsConfig {
    /// Source type
    #[serde(default)]
    pub source: CommandSourceKind,

    /// Commands replayed to every session (script source)
    #[serde(default)]
    pub script: Vec<String>,

    /// Payload file sent to session 0 (stage mode)
    pub payload: Option<String>,
}

/// Available command sources
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandSourceKind {
    /// Interactive stdin prompt
    #[default]
    Prompt,
    /// Fixed list of commands
    Script,
}

/// Global settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Enable structured JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Humantime serde support module
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
