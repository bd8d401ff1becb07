//! Process-wide command registry and per-call output context.
//!
//! The registry is built once at startup (`Registry::new`) and handed to
//! every transport as an `Arc`. Registration happens before the transports
//! start serving; after that the table is effectively read-only.

use crate::error::{ShellError, ShellResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Maximum number of registered commands, built-ins included.
pub const CMD_CAP: usize = 64;

/// Per-call output chunk bound; one byte of the chunk stays reserved, so
/// a single print call emits at most `PRINT_CHUNK - 1` bytes.
pub const PRINT_CHUNK: usize = 512;

/// A diagnostic command exposed through the shell.
///
/// Commands receive the tokenized argument list (`args[0]` is the command
/// name) and a [`CmdCtx`] routing output back to the invoking session.
/// The returned status is informational; it is logged, not sent to the
/// peer.
#[async_trait]
pub trait ShellCommand: Send + Sync {
    async fn run(&self, ctx: &mut CmdCtx<'_>, args: &[String]) -> i32;
}

/// Output router for one command invocation.
///
/// Borrows the session's writer for the duration of the call, so command
/// output lands on the transport the command came in on.
pub struct CmdCtx<'a> {
    out: &'a mut (dyn AsyncWrite + Unpin + Send),
}

impl<'a> CmdCtx<'a> {
    pub(crate) fn new(out: &'a mut (dyn AsyncWrite + Unpin + Send)) -> Self {
        Self { out }
    }

    /// Write one chunk of text, `format!`-ed by the caller. Each call is
    /// bounded to `PRINT_CHUNK - 1` bytes; anything beyond is silently
    /// dropped. Returns the number of bytes written, or a negative status
    /// when the write failed (the session will notice on its next write).
    pub async fn print(&mut self, text: impl AsRef<str> + Send) -> i32 {
        let text = text.as_ref();
        let mut end = text.len().min(PRINT_CHUNK - 1);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        match self.out.write_all(text[..end].as_bytes()).await {
            Ok(()) => end as i32,
            Err(_) => -1,
        }
    }
}

#[derive(Clone)]
pub struct CommandEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub handler: Arc<dyn ShellCommand>,
}

/// Result of prefix completion over the registry.
///
/// `matches` lists every command name starting with the prefix; `common`
/// is empty for no match, the full name for one match, and the longest
/// common prefix for several.
#[derive(Debug, Default)]
pub struct Completion {
    pub matches: Vec<&'static str>,
    pub common: String,
}

pub struct Registry {
    commands: RwLock<Vec<CommandEntry>>,
    cap: usize,
}

impl Registry {
    /// Build a registry with the default capacity. `help` is registered
    /// up front and counts toward the capacity.
    pub fn new() -> Arc<Self> {
        Self::with_capacity(CMD_CAP)
    }

    pub fn with_capacity(cap: usize) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Registry>| {
            let registry = Self {
                commands: RwLock::new(Vec::new()),
                cap,
            };
            registry.commands.write().push(CommandEntry {
                name: "help",
                description: "list registered commands",
                handler: Arc::new(HelpCommand {
                    registry: weak.clone(),
                }),
            });
            registry
        })
    }

    /// Register a command. Names must be unique; entries live for the
    /// process lifetime.
    pub fn register(
        &self,
        name: &'static str,
        description: &'static str,
        handler: Arc<dyn ShellCommand>,
    ) -> ShellResult<()> {
        let mut commands = self.commands.write();
        if commands.iter().any(|e| e.name == name) {
            return Err(ShellError::DuplicateName(name));
        }
        if commands.len() >= self.cap {
            return Err(ShellError::RegistryFull);
        }
        commands.push(CommandEntry {
            name,
            description,
            handler,
        });
        Ok(())
    }

    /// Register a plain function or closure producing its whole output in
    /// one go. Output beyond one print chunk is truncated; commands with
    /// more to say implement [`ShellCommand`] and print in pieces.
    pub fn register_fn<F>(
        &self,
        name: &'static str,
        description: &'static str,
        f: F,
    ) -> ShellResult<()>
    where
        F: Fn(&[String]) -> String + Send + Sync + 'static,
    {
        self.register(name, description, Arc::new(FnCommand(f)))
    }

    pub fn find(&self, name: &str) -> Option<CommandEntry> {
        self.commands.read().iter().find(|e| e.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.commands.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.read().is_empty()
    }

    /// Snapshot of `(name, description)` pairs in registration order.
    pub fn entries(&self) -> Vec<(&'static str, &'static str)> {
        self.commands
            .read()
            .iter()
            .map(|e| (e.name, e.description))
            .collect()
    }

    /// Prefix completion across all registered names.
    pub fn complete(&self, prefix: &str) -> Completion {
        let commands = self.commands.read();
        let matches: Vec<&'static str> = commands
            .iter()
            .map(|e| e.name)
            .filter(|n| n.starts_with(prefix))
            .collect();

        let common = match matches.len() {
            0 => String::new(),
            1 => matches[0].to_string(),
            _ => longest_common_prefix(&matches).to_string(),
        };

        Completion { matches, common }
    }
}

fn longest_common_prefix<'n>(names: &[&'n str]) -> &'n str {
    let first = names[0];
    let mut len = first.len();
    for name in &names[1..] {
        len = len.min(
            first
                .bytes()
                .zip(name.bytes())
                .take_while(|(a, b)| a == b)
                .count(),
        );
    }
    &first[..len]
}

struct FnCommand<F>(F);

#[async_trait]
impl<F> ShellCommand for FnCommand<F>
where
    F: Fn(&[String]) -> String + Send + Sync,
{
    async fn run(&self, ctx: &mut CmdCtx<'_>, args: &[String]) -> i32 {
        let text = (self.0)(args);
        if text.is_empty() {
            return 0;
        }
        let status = ctx.print(&text).await;
        if status < 0 { status } else { 0 }
    }
}

/// `help`: one line per registered command.
struct HelpCommand {
    registry: Weak<Registry>,
}

#[async_trait]
impl ShellCommand for HelpCommand {
    async fn run(&self, ctx: &mut CmdCtx<'_>, _args: &[String]) -> i32 {
        let Some(registry) = self.registry.upgrade() else {
            return -1;
        };
        for (name, description) in registry.entries() {
            ctx.print(format!("  {name}  - {description}\r\n")).await;
        }
        0
    }
}
