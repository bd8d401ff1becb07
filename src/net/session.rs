//! The shared per-connection loop: read one byte, feed the editor, write
//! its echo, execute committed lines. Every transport funnels through
//! [`drive`], differing only in stream types, telnet mode and the
//! authentication gate.

use crate::error::ShellResult;
use crate::input::editor::{EditEvent, LineEditor};
use crate::input::parser::split_line;
use crate::net::SESSION_POLL;
use crate::registry::{CmdCtx, Registry};
use crate::util::telnet::IacFilter;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Auth loop limits.
pub(crate) const AUTH_MAX_ATTEMPTS: u32 = 3;
const AUTH_FIELD_CAP: usize = 64;

fn latched(active: &AtomicBool, running: Option<&AtomicBool>) -> bool {
    active.load(Ordering::Relaxed) && running.is_none_or(|r| r.load(Ordering::Relaxed))
}

/// Run the editor loop until the peer disconnects or a shutdown latch
/// clears. Emits the initial prompt itself.
pub(crate) async fn drive<R, W>(
    reader: &mut R,
    writer: &mut W,
    editor: &mut LineEditor,
    registry: &Registry,
    active: &AtomicBool,
    running: Option<&AtomicBool>,
) -> ShellResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let mut one = [0u8; 1];

    writer.write_all(editor.prompt().as_bytes()).await?;
    writer.flush().await?;

    while latched(active, running) {
        let n = match timeout(SESSION_POLL, reader.read(&mut one)).await {
            Err(_) => continue, // poll tick; re-check the latches
            Ok(res) => res?,
        };
        if n == 0 {
            break; // disconnect
        }

        let step = editor.feed(one[0]);
        if !step.echo.is_empty() {
            writer.write_all(&step.echo).await?;
            writer.flush().await?;
        }

        match step.event {
            None => {}
            Some(EditEvent::Eof) => {
                active.store(false, Ordering::Relaxed);
            }
            Some(EditEvent::Line(line)) => {
                execute_line(&line, registry, writer, active).await?;
                if latched(active, running) {
                    writer.write_all(editor.prompt().as_bytes()).await?;
                    writer.flush().await?;
                }
            }
        }
    }

    Ok(())
}

/// Tokenize and dispatch one committed line. `exit`/`quit` are handled
/// here rather than through the registry.
pub(crate) async fn execute_line<W>(
    line: &str,
    registry: &Registry,
    writer: &mut W,
    active: &AtomicBool,
) -> ShellResult<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let args = match split_line(line) {
        Ok(args) => args,
        // Oversized argument lists are dropped, not surfaced.
        Err(_) => return Ok(()),
    };
    let Some(head) = args.first() else {
        return Ok(());
    };

    if head == "exit" || head == "quit" {
        writer.write_all(b"Bye.\r\n").await?;
        writer.flush().await?;
        active.store(false, Ordering::Relaxed);
        return Ok(());
    }

    match registry.find(head) {
        Some(entry) => {
            tracing::debug!(command = entry.name, "dispatch");
            let mut ctx = CmdCtx::new(writer);
            let status = entry.handler.run(&mut ctx, &args).await;
            if status != 0 {
                tracing::debug!(command = entry.name, status, "nonzero exit status");
            }
        }
        None => {
            writer
                .write_all(format!("unknown command: {head}\r\n").as_bytes())
                .await?;
        }
    }
    writer.flush().await?;
    Ok(())
}

enum FieldEcho {
    Plain,
    Masked,
}

/// Line reader for the login gate: IAC-filtered, backspace-aware, with
/// CR-LF pairing carried across fields so `user\r\npass\r\n` reads as two
/// lines. Password bytes are echoed as `*`, never verbatim.
struct AuthReader<'a, R> {
    inner: &'a mut R,
    iac: IacFilter,
    swallow_nl: bool,
}

impl<'a, R: AsyncRead + Unpin> AuthReader<'a, R> {
    fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            iac: IacFilter::new(),
            swallow_nl: false,
        }
    }

    /// Next post-negotiation data byte, or `None` on disconnect/shutdown.
    async fn next_data(
        &mut self,
        active: &AtomicBool,
        running: Option<&AtomicBool>,
    ) -> ShellResult<Option<u8>> {
        let mut one = [0u8; 1];
        loop {
            if !latched(active, running) {
                return Ok(None);
            }
            let n = match timeout(SESSION_POLL, self.inner.read(&mut one)).await {
                Err(_) => continue,
                Ok(res) => res?,
            };
            if n == 0 {
                return Ok(None);
            }
            let Some(b) = self.iac.push(one[0]) else {
                continue;
            };
            if self.swallow_nl {
                self.swallow_nl = false;
                if b == b'\n' || b == 0 {
                    continue;
                }
            }
            return Ok(Some(b));
        }
    }

    async fn read_field<W>(
        &mut self,
        writer: &mut W,
        echo: FieldEcho,
        active: &AtomicBool,
        running: Option<&AtomicBool>,
    ) -> ShellResult<Option<String>>
    where
        W: AsyncWrite + Unpin,
    {
        let mut field = Vec::new();
        loop {
            let Some(b) = self.next_data(active, running).await? else {
                return Ok(None);
            };
            match b {
                b'\r' | b'\n' => {
                    if b == b'\r' {
                        self.swallow_nl = true;
                    }
                    writer.write_all(b"\r\n").await?;
                    writer.flush().await?;
                    return Ok(Some(String::from_utf8_lossy(&field).into_owned()));
                }
                0x08 | 0x7F => {
                    if field.pop().is_some() {
                        writer.write_all(b"\x08 \x08").await?;
                        writer.flush().await?;
                    }
                }
                0x20..=0x7E => {
                    // Over-long fields are truncated silently.
                    if field.len() < AUTH_FIELD_CAP {
                        field.push(b);
                        let shown = match echo {
                            FieldEcho::Plain => b,
                            FieldEcho::Masked => b'*',
                        };
                        writer.write_all(&[shown]).await?;
                        writer.flush().await?;
                    }
                }
                _ => {}
            }
        }
    }
}

/// Username/password gate: up to [`AUTH_MAX_ATTEMPTS`] tries, byte-exact
/// comparison against the configured credentials.
pub(crate) async fn authenticate<R, W>(
    reader: &mut R,
    writer: &mut W,
    username: &str,
    password: &str,
    active: &AtomicBool,
    running: Option<&AtomicBool>,
) -> ShellResult<bool>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut auth = AuthReader::new(reader);

    for attempt in 1..=AUTH_MAX_ATTEMPTS {
        writer.write_all(b"Username: ").await?;
        writer.flush().await?;
        let Some(user) = auth
            .read_field(writer, FieldEcho::Plain, active, running)
            .await?
        else {
            return Ok(false);
        };

        writer.write_all(b"Password: ").await?;
        writer.flush().await?;
        let Some(pass) = auth
            .read_field(writer, FieldEcho::Masked, active, running)
            .await?
        else {
            return Ok(false);
        };

        if user == username && pass == password {
            writer.write_all(b"Login successful.\r\n").await?;
            writer.flush().await?;
            return Ok(true);
        }

        tracing::warn!(attempt, "invalid credentials");
        if attempt < AUTH_MAX_ATTEMPTS {
            writer.write_all(b"Invalid credentials. Try again.\r\n").await?;
            writer.flush().await?;
        }
    }

    writer.write_all(b"Authentication failed.\r\n").await?;
    writer.flush().await?;
    Ok(false)
}
