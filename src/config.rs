use crate::error::{ShellError, ShellResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Compile-time ceiling on concurrent telnet sessions.
pub const SESSION_CAP: usize = 8;

pub const DEFAULT_PROMPT: &str = "embsh> ";
pub const DEFAULT_BANNER: &str = "\r\n=== embsh v0.1.0 ===\r\n\r\n";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelnetConfig {
    /// TCP listen port.
    pub port: u16,
    /// Cap on concurrent sessions; clamped to [`SESSION_CAP`].
    pub max_sessions: usize,
    pub prompt: String,
    /// Sent at connect, before the prompt. `None` suppresses it.
    pub banner: Option<String>,
    /// Authentication is required iff both username and password are set.
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            port: 2323,
            max_sessions: SESSION_CAP,
            prompt: DEFAULT_PROMPT.to_string(),
            banner: Some(DEFAULT_BANNER.to_string()),
            username: None,
            password: None,
        }
    }
}

impl TelnetConfig {
    pub fn auth_required(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    pub fn session_slots(&self) -> usize {
        self.max_sessions.clamp(1, SESSION_CAP)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub prompt: String,
    /// Whether to run the prepare/restore hook around the session.
    pub raw_mode: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            raw_mode: true,
        }
    }
}

/// The eight supported UART rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u32")]
pub enum Baud {
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
    B230400,
    B460800,
    B921600,
}

impl Baud {
    pub fn as_u32(self) -> u32 {
        match self {
            Baud::B9600 => 9_600,
            Baud::B19200 => 19_200,
            Baud::B38400 => 38_400,
            Baud::B57600 => 57_600,
            Baud::B115200 => 115_200,
            Baud::B230400 => 230_400,
            Baud::B460800 => 460_800,
            Baud::B921600 => 921_600,
        }
    }
}

impl TryFrom<u32> for Baud {
    type Error = ShellError;

    fn try_from(rate: u32) -> ShellResult<Self> {
        match rate {
            9_600 => Ok(Baud::B9600),
            19_200 => Ok(Baud::B19200),
            38_400 => Ok(Baud::B38400),
            57_600 => Ok(Baud::B57600),
            115_200 => Ok(Baud::B115200),
            230_400 => Ok(Baud::B230400),
            460_800 => Ok(Baud::B460800),
            921_600 => Ok(Baud::B921600),
            other => Err(ShellError::InvalidArgument(format!(
                "unsupported baud rate: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, opened unless an override stream is attached.
    pub device: PathBuf,
    pub baud: Baud,
    pub prompt: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/ttyS0"),
            baud: Baud::B115200,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

/// Aggregate configuration covering all three transports.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telnet: TelnetConfig,
    pub console: ConsoleConfig,
    pub serial: SerialConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> ShellResult<Self> {
        let data = std::fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&data)
            .map_err(|e| ShellError::InvalidArgument(format!("config parse: {e}")))?;
        Ok(cfg)
    }

    /// Defaults overridden by `EMBSH_*` environment variables (an `.env`
    /// file is consulted first).
    pub fn from_env() -> ShellResult<Self> {
        let _ = dotenvy::from_filename(".env");
        let mut cfg = Self::default();

        if let Some(port) = env_parse::<u16>("EMBSH_PORT")? {
            cfg.telnet.port = port;
        }
        if let Some(max) = env_parse::<usize>("EMBSH_MAX_SESSIONS")? {
            cfg.telnet.max_sessions = max;
        }
        if let Ok(prompt) = std::env::var("EMBSH_PROMPT") {
            cfg.telnet.prompt = prompt.clone();
            cfg.console.prompt = prompt.clone();
            cfg.serial.prompt = prompt;
        }
        if let Ok(banner) = std::env::var("EMBSH_BANNER") {
            cfg.telnet.banner = (!banner.is_empty()).then_some(banner);
        }
        cfg.telnet.username = std::env::var("EMBSH_USERNAME").ok();
        cfg.telnet.password = std::env::var("EMBSH_PASSWORD").ok();
        if let Some(raw) = env_parse::<bool>("EMBSH_CONSOLE_RAW")? {
            cfg.console.raw_mode = raw;
        }
        if let Ok(device) = std::env::var("EMBSH_SERIAL_DEVICE") {
            cfg.serial.device = PathBuf::from(device);
        }
        if let Some(rate) = env_parse::<u32>("EMBSH_SERIAL_BAUD")? {
            cfg.serial.baud = Baud::try_from(rate)?;
        }

        Ok(cfg)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> ShellResult<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ShellError::InvalidArgument(format!("invalid {key}: {value}"))),
        Err(_) => Ok(None),
    }
}
