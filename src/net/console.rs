//! Local console transport: a single session over caller-provided byte
//! streams (stdin/stdout by default). Raw-mode handling is delegated to a
//! [`TermPrep`] hook; when the streams are pipes (tests), no hook is set
//! and nothing touches the terminal.

use crate::config::ConsoleConfig;
use crate::error::{ShellError, ShellResult};
use crate::input::editor::LineEditor;
use crate::net::{session, TermPrep};
use crate::registry::Registry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

pub struct ConsoleShell {
    config: ConsoleConfig,
    registry: Arc<Registry>,
    active: Arc<AtomicBool>,
    prep: Option<Box<dyn TermPrep>>,
    task: Option<JoinHandle<ShellResult<()>>>,
}

impl ConsoleShell {
    pub fn new(registry: Arc<Registry>, config: ConsoleConfig) -> Self {
        Self {
            config,
            registry,
            active: Arc::new(AtomicBool::new(false)),
            prep: None,
            task: None,
        }
    }

    /// Install the terminal prepare/restore hook. Only consulted when
    /// `raw_mode` is enabled.
    pub fn set_prep(&mut self, prep: Box<dyn TermPrep>) {
        self.prep = Some(prep);
    }

    fn prepare(&mut self) -> ShellResult<()> {
        if self.config.raw_mode {
            if let Some(prep) = &mut self.prep {
                prep.prepare()?;
            }
        }
        Ok(())
    }

    fn restore(&mut self) {
        if self.config.raw_mode {
            if let Some(prep) = &mut self.prep {
                prep.restore();
            }
        }
    }

    /// Drive the shell on the current task until EOF or `exit`.
    pub async fn run<R, W>(&mut self, mut reader: R, mut writer: W) -> ShellResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send,
    {
        if self.active.swap(true, Ordering::Relaxed) {
            return Err(ShellError::AlreadyRunning);
        }
        if let Err(e) = self.prepare() {
            self.active.store(false, Ordering::Relaxed);
            return Err(e);
        }

        let mut editor =
            LineEditor::new(self.config.prompt.clone(), self.registry.clone(), false);
        let result = session::drive(
            &mut reader,
            &mut writer,
            &mut editor,
            &self.registry,
            &self.active,
            None,
        )
        .await;

        self.restore();
        self.active.store(false, Ordering::Relaxed);
        result
    }

    /// Convenience wrapper over the process stdio streams.
    pub async fn run_stdio(&mut self) -> ShellResult<()> {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Background mode: spawn the session task and return.
    pub fn start<R, W>(&mut self, mut reader: R, mut writer: W) -> ShellResult<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        if self.active.swap(true, Ordering::Relaxed) {
            return Err(ShellError::AlreadyRunning);
        }
        if let Err(e) = self.prepare() {
            self.active.store(false, Ordering::Relaxed);
            return Err(e);
        }

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
            result
        }));
        Ok(())
    }

    /// Stop a background session and join it.
    pub async fn stop(&mut self) -> ShellResult<()> {
        let Some(task) = self.task.take() else {
            return Err(ShellError::NotRunning);
        };
        self.active.store(false, Ordering::Relaxed);
        let _ = task.await;
        self.restore();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}
