//! Multi-session TCP telnet transport.
//!
//! One accept task polls the listener; each connection gets a slot out of
//! a fixed pool and its own task driving the shared session loop. Stopping
//! is cooperative: latches are cleared and every task is joined, with the
//! poll intervals bounding how long that takes.

use crate::config::TelnetConfig;
use crate::error::{ShellError, ShellResult};
use crate::input::editor::LineEditor;
use crate::net::{session, ACCEPT_POLL};
use crate::registry::Registry;
use crate::util::telnet::ANNOUNCE;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const LISTEN_BACKLOG: u32 = 4;

struct SessionSlot {
    in_use: AtomicBool,
    /// Per-session shutdown latch; cleared by `stop()`.
    active: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            in_use: AtomicBool::new(false),
            active: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }
}

pub struct TelnetServer {
    config: Arc<TelnetConfig>,
    registry: Arc<Registry>,
    running: Arc<AtomicBool>,
    slots: Arc<Vec<SessionSlot>>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl TelnetServer {
    pub fn new(registry: Arc<Registry>, config: TelnetConfig) -> Self {
        let slots = (0..config.session_slots()).map(|_| SessionSlot::new()).collect();
        Self {
            config: Arc::new(config),
            registry,
            running: Arc::new(AtomicBool::new(false)),
            slots: Arc::new(slots),
            accept_task: None,
            local_addr: None,
        }
    }

    /// Bind the listen socket and spawn the accept task.
    pub async fn start(&mut self) -> ShellResult<()> {
        if self.running.load(Ordering::Relaxed) {
            return Err(ShellError::AlreadyRunning);
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                ShellError::PortInUse(self.config.port)
            } else {
                ShellError::Io(e)
            }
        })?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        self.running.store(true, Ordering::Relaxed);
        tracing::info!(addr = %local_addr, "telnet shell listening");

        let registry = self.registry.clone();
        let config = self.config.clone();
        let running = self.running.clone();
        let slots = self.slots.clone();
        self.accept_task = Some(tokio::spawn(accept_loop(
            listener, registry, config, running, slots,
        )));
        Ok(())
    }

    /// Cooperative shutdown: clear the latches and join every task.
    pub async fn stop(&mut self) -> ShellResult<()> {
        if !self.running.swap(false, Ordering::Relaxed) {
            return Err(ShellError::NotRunning);
        }
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        for slot in self.slots.iter() {
            slot.active.store(false, Ordering::Relaxed);
            let task = slot.task.lock().take();
            if let Some(task) = task {
                let _ = task.await;
            }
            slot.in_use.store(false, Ordering::Relaxed);
        }
        self.local_addr = None;
        tracing::info!("telnet shell stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Bound address while running (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.in_use.load(Ordering::Relaxed))
            .count()
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    config: Arc<TelnetConfig>,
    running: Arc<AtomicBool>,
    slots: Arc<Vec<SessionSlot>>,
) {
    while running.load(Ordering::Relaxed) {
        let (stream, peer) = match timeout(ACCEPT_POLL, listener.accept()).await {
            Err(_) => continue, // poll tick; re-check running
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to accept connection");
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                continue;
            }
        };
        tracing::info!(%peer, "client connected");

        let Some(index) = claim_slot(&slots) else {
            tracing::warn!(%peer, "session limit reached, rejecting");
            let mut stream = stream;
            let _ = stream.write_all(b"Too many connections.\r\n").await;
            let _ = stream.shutdown().await;
            continue;
        };

        let registry = registry.clone();
        let config = config.clone();
        let running = running.clone();
        let slots_for_task = slots.clone();
        let task = tokio::spawn(async move {
            let slot = &slots_for_task[index];
            if let Err(e) =
                run_session(stream, &registry, &config, &slot.active, &running).await
            {
                tracing::error!(%peer, error = %e, "session error");
            }
            slot.in_use.store(false, Ordering::Relaxed);
            tracing::info!(%peer, "client disconnected");
        });
        *slots[index].task.lock() = Some(task);
    }
}

/// First free slot, claimed atomically. A slot whose task has finished is
/// free again; its stale handle is replaced on the next claim.
fn claim_slot(slots: &[SessionSlot]) -> Option<usize> {
    for (index, slot) in slots.iter().enumerate() {
        if slot
            .in_use
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            slot.active.store(true, Ordering::Relaxed);
            return Some(index);
        }
    }
    None
}

async fn run_session(
    stream: TcpStream,
    registry: &Arc<Registry>,
    config: &TelnetConfig,
    active: &AtomicBool,
    running: &AtomicBool,
) -> ShellResult<()> {
    let (mut reader, mut writer) = stream.into_split();

    // Character-at-a-time mode: we suppress go-ahead and take over echo.
    writer.write_all(&ANNOUNCE).await?;
    if let Some(banner) = &config.banner {
        writer.write_all(banner.as_bytes()).await?;
    }
    writer.flush().await?;

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        let ok = session::authenticate(
            &mut reader,
            &mut writer,
            username,
            password,
            active,
            Some(running),
        )
        .await?;
        if !ok {
            tracing::warn!("authentication failed");
            let _ = writer.shutdown().await;
            return Ok(());
        }
    }

    let mut editor = LineEditor::new(config.prompt.clone(), registry.clone(), true);
    let result = session::drive(
        &mut reader,
        &mut writer,
        &mut editor,
        registry,
        active,
        Some(running),
    )
    .await;

    let _ = writer.shutdown().await;
    result
}
