//! Serial (UART) transport: the single-session loop over a character
//! device. Line-speed and termios programming belong to the [`TermPrep`]
//! hook; this module owns opening/closing the device and the baud table
//! validation carried by [`crate::config::SerialConfig`].
//!
//! Tests inject a pre-opened stream pair (e.g. a PTY or duplex pipe) via
//! [`SerialShell::attach`], which bypasses both the open and the hook.

use crate::config::SerialConfig;
use crate::error::{ShellError, ShellResult};
use crate::input::editor::LineEditor;
use crate::net::{session, TermPrep};
use crate::registry::Registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

type Reader = Box<dyn AsyncRead + Unpin + Send>;
type Writer = Box<dyn AsyncWrite + Unpin + Send>;

pub struct SerialShell {
    config: SerialConfig,
    registry: Arc<Registry>,
    active: Arc<AtomicBool>,
    prep: Option<Box<dyn TermPrep>>,
    override_io: Option<(Reader, Writer)>,
    task: Option<JoinHandle<ShellResult<()>>>,
}

impl SerialShell {
    pub fn new(registry: Arc<Registry>, config: SerialConfig) -> Self {
        Self {
            config,
            registry,
            active: Arc::new(AtomicBool::new(false)),
            prep: None,
            override_io: None,
            task: None,
        }
    }

    /// Install the device prepare/restore hook (baud, 8N1, raw flags).
    /// Not consulted for attached override streams.
    pub fn set_prep(&mut self, prep: Box<dyn TermPrep>) {
        self.prep = Some(prep);
    }

    /// Use a pre-opened stream pair instead of opening the device.
    pub fn attach<R, W>(&mut self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.override_io = Some((Box::new(reader), Box::new(writer)));
    }

    /// Open the device (unless one is attached) and spawn the session
    /// task.
    pub async fn start(&mut self) -> ShellResult<()> {
        if self.active.swap(true, Ordering::Relaxed) {
            return Err(ShellError::AlreadyRunning);
        }

        let io = match self.override_io.take() {
            Some(io) => io,
            None => match self.open_device().await {
                Ok(io) => io,
                Err(e) => {
                    self.active.store(false, Ordering::Relaxed);
                    return Err(e);
                }
            },
        };
        let (mut reader, mut writer) = io;

        tracing::info!(device = %self.config.device.display(), baud = self.config.baud.as_u32(), "serial shell started");

        let registry = self.registry.clone();
        let active = self.active.clone();
        let prompt = self.config.prompt.clone();
        self.task = Some(tokio::spawn(async move {
            let mut editor = LineEditor::new(prompt, registry.clone(), false);
            let result = session::drive(
                &mut reader,
                &mut writer,
                &mut editor,
                &registry,
                &active,
                None,
            )
            .await;
            active.store(false, Ordering::Relaxed);
            // The device handles drop here, closing them iff we opened them.
            result
        }));
        Ok(())
    }

    async fn open_device(&mut self) -> ShellResult<(Reader, Writer)> {
        let device = self.config.device.clone();
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&device)
            .await
            .map_err(|e| ShellError::DeviceOpenFailed(format!("{}: {e}", device.display())))?;
        let writer = file
            .try_clone()
            .await
            .map_err(|e| ShellError::DeviceOpenFailed(format!("{}: {e}", device.display())))?;

        if let Some(prep) = &mut self.prep {
            prep.prepare()
                .map_err(|e| ShellError::DeviceOpenFailed(e.to_string()))?;
        }

        Ok((Box::new(file), Box::new(writer)))
    }

    /// Stop the session and join it. Restores the device via the hook iff
    /// this transport configured it.
    pub async fn stop(&mut self) -> ShellResult<()> {
        let Some(task) = self.task.take() else {
            return Err(ShellError::NotRunning);
        };
        self.active.store(false, Ordering::Relaxed);
        let _ = task.await;
        if let Some(prep) = &mut self.prep {
            prep.restore();
        }
        tracing::info!("serial shell stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}
