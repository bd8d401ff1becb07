use crate::error::ShellResult;
use std::time::Duration;

pub mod console;
pub mod serial;
pub mod session;
pub mod telnet;

/// Session read poll interval; cooperative-shutdown flags are observed at
/// this cadence.
pub(crate) const SESSION_POLL: Duration = Duration::from_millis(200);

/// Accept poll interval on the listen socket.
pub(crate) const ACCEPT_POLL: Duration = Duration::from_millis(500);

/// Prepare/restore hook for transports that sit on a real terminal or
/// UART. The library never touches tty attributes or line speeds itself;
/// the application supplies whatever termios work its platform needs.
/// `prepare` runs before the first byte is read, `restore` after the
/// session ends.
pub trait TermPrep: Send {
    fn prepare(&mut self) -> ShellResult<()>;
    fn restore(&mut self);
}
