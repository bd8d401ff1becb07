//! embsh — an embedded debug shell.
//!
//! Register commands once, then expose them over any mix of a multi-session
//! telnet server, the local console, and a serial link. All transports
//! share one registry and one byte-driven line editor (history, tab
//! completion, ANSI arrow keys, telnet option filtering).

pub mod config;
pub mod error;
pub mod input;
pub mod net;
pub mod registry;
pub mod util;

// Convenient re-exports (so call sites can do `embsh::Registry`, etc.)
pub use config::{Baud, Config, ConsoleConfig, SerialConfig, TelnetConfig};
pub use error::{ShellError, ShellResult};
pub use input::editor::{EditEvent, EditStep, LineEditor};
pub use net::console::ConsoleShell;
pub use net::serial::SerialShell;
pub use net::telnet::TelnetServer;
pub use net::TermPrep;
pub use registry::{CmdCtx, CommandEntry, Completion, Registry, ShellCommand};
