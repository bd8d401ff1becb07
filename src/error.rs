use thiserror::Error;

pub type ShellResult<T> = Result<T, ShellError>;

/// Flat error vocabulary for the shell's fallible boundary operations.
///
/// The editor and command paths never surface these: malformed bytes are
/// ignored, overflows truncate, and an unknown command is a line of output.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Registry is at capacity
    #[error("command registry full")]
    RegistryFull,

    /// A command with this name is already registered
    #[error("duplicate command name: {0}")]
    DuplicateName(&'static str),

    /// Login gate rejected the peer
    #[error("authentication failed")]
    AuthFailed,

    /// Listen port already bound
    #[error("port {0} already in use")]
    PortInUse(u16),

    /// Transport started twice
    #[error("already running")]
    AlreadyRunning,

    /// Stop or query on a transport that was never started
    #[error("not running")]
    NotRunning,

    /// Serial/console device could not be opened or configured
    #[error("failed to open device: {0}")]
    DeviceOpenFailed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
