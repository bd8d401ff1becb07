//! End-to-end shell scenarios: literal I/O over in-memory pipes for the
//! console transport and over real TCP for the telnet server.

use anyhow::Result;
use embsh::{ConsoleConfig, ConsoleShell, Registry, SerialConfig, SerialShell, TelnetConfig, TelnetServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Opt-in log output for debugging: `RUST_LOG=debug cargo test`.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Read from `reader` until the transcript ends with `needle`.
async fn expect<R>(reader: &mut R, transcript: &mut Vec<u8>, needle: &str) -> Result<()>
where
    R: AsyncReadExt + Unpin,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    let mut buf = [0u8; 256];
    loop {
        if transcript.ends_with(needle.as_bytes()) {
            return Ok(());
        }
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_default();
        if remaining.is_zero() {
            anyhow::bail!(
                "timed out waiting for {:?}; transcript so far: {:?}",
                needle,
                String::from_utf8_lossy(transcript)
            );
        }
        let n = timeout(remaining, reader.read(&mut buf)).await??;
        if n == 0 {
            anyhow::bail!(
                "stream closed waiting for {:?}; transcript: {:?}",
                needle,
                String::from_utf8_lossy(transcript)
            );
        }
        transcript.extend_from_slice(&buf[..n]);
    }
}

fn demo_registry() -> Arc<Registry> {
    let registry = Registry::new();
    registry
        .register_fn("hello", "say hi", |_| "Hi\r\n".to_string())
        .unwrap();
    registry
        .register_fn("reboot", "restart the target", |_| "rebooting\r\n".to_string())
        .unwrap();
    registry
        .register_fn("status_a", "status a", |_| String::new())
        .unwrap();
    registry
        .register_fn("status_b", "status b", |_| String::new())
        .unwrap();
    registry
}

/// Console shell wired to an in-memory pipe; returns the client ends.
fn spawn_console(registry: Arc<Registry>) -> (WriteHalf<DuplexStream>, ReadHalf<DuplexStream>) {
    init_tracing();
    let (client, server) = tokio::io::duplex(4096);
    let (server_read, server_write) = tokio::io::split(server);
    let (client_read, client_write) = tokio::io::split(client);

    tokio::spawn(async move {
        let mut shell = ConsoleShell::new(registry, ConsoleConfig::default());
        let _ = shell.run(server_read, server_write).await;
    });

    (client_write, client_read)
}

// ---- Console scenarios ----

#[tokio::test]
async fn t_basic_echo_scenario() -> Result<()> {
    let (mut tx, mut rx) = spawn_console(demo_registry());
    let mut seen = Vec::new();

    expect(&mut rx, &mut seen, "embsh> ").await?;
    tx.write_all(b"hi").await?;
    expect(&mut rx, &mut seen, "hi").await?;
    tx.write_all(b"\r").await?;
    expect(&mut rx, &mut seen, "unknown command: hi\r\nembsh> ").await?;

    tx.write_all(b"hello\r").await?;
    expect(&mut rx, &mut seen, "hello\r\nHi\r\nembsh> ").await?;
    Ok(())
}

#[tokio::test]
async fn t_unknown_command_scenario() -> Result<()> {
    let (mut tx, mut rx) = spawn_console(demo_registry());
    let mut seen = Vec::new();

    expect(&mut rx, &mut seen, "embsh> ").await?;
    tx.write_all(b"xyzzy\r").await?;
    expect(&mut rx, &mut seen, "xyzzy\r\nunknown command: xyzzy\r\nembsh> ").await?;
    Ok(())
}

#[tokio::test]
async fn t_history_recall_scenario() -> Result<()> {
    let (mut tx, mut rx) = spawn_console(demo_registry());
    let mut seen = Vec::new();

    expect(&mut rx, &mut seen, "embsh> ").await?;
    tx.write_all(b"aa\r").await?;
    expect(&mut rx, &mut seen, "embsh> ").await?;
    tx.write_all(b"bb\r").await?;
    expect(&mut rx, &mut seen, "embsh> ").await?;

    tx.write_all(b"\x1b[A").await?;
    expect(&mut rx, &mut seen, "bb").await?;
    tx.write_all(b"\x1b[A").await?;
    // erase "bb", redraw "aa"
    expect(&mut rx, &mut seen, "\x08 \x08\x08 \x08aa").await?;
    tx.write_all(b"\x1b[B").await?;
    expect(&mut rx, &mut seen, "\x08 \x08\x08 \x08bb").await?;
    // past newest: erased to an empty line; commit proves it is empty
    tx.write_all(b"\x1b[B").await?;
    expect(&mut rx, &mut seen, "\x08 \x08\x08 \x08").await?;
    tx.write_all(b"\r").await?;
    expect(&mut rx, &mut seen, "\r\nembsh> ").await?;
    Ok(())
}

#[tokio::test]
async fn t_tab_completion_single_match() -> Result<()> {
    let (mut tx, mut rx) = spawn_console(demo_registry());
    let mut seen = Vec::new();

    expect(&mut rx, &mut seen, "embsh> ").await?;
    tx.write_all(b"re\t").await?;
    expect(&mut rx, &mut seen, "re\x08 \x08\x08 \x08reboot ").await?;
    tx.write_all(b"\r").await?;
    expect(&mut rx, &mut seen, "rebooting\r\nembsh> ").await?;
    Ok(())
}

#[tokio::test]
async fn t_tab_completion_multi_match() -> Result<()> {
    let (mut tx, mut rx) = spawn_console(demo_registry());
    let mut seen = Vec::new();

    expect(&mut rx, &mut seen, "embsh> ").await?;
    tx.write_all(b"sta\t").await?;
    expect(
        &mut rx,
        &mut seen,
        "sta\r\nstatus_a  status_b  \r\nembsh> status_",
    )
    .await?;
    Ok(())
}

#[tokio::test]
async fn t_ctrl_d_ends_console_session() -> Result<()> {
    let (mut tx, mut rx) = spawn_console(demo_registry());
    let mut seen = Vec::new();

    expect(&mut rx, &mut seen, "embsh> ").await?;
    tx.write_all(&[0x04]).await?;
    expect(&mut rx, &mut seen, "\r\nBye.\r\n").await?;
    Ok(())
}

#[tokio::test]
async fn t_exit_builtin_ends_session() -> Result<()> {
    let (mut tx, mut rx) = spawn_console(demo_registry());
    let mut seen = Vec::new();

    expect(&mut rx, &mut seen, "embsh> ").await?;
    tx.write_all(b"exit\r").await?;
    expect(&mut rx, &mut seen, "exit\r\nBye.\r\n").await?;
    Ok(())
}

#[tokio::test]
async fn t_help_builtin_lists_registered() -> Result<()> {
    let (mut tx, mut rx) = spawn_console(demo_registry());
    let mut seen = Vec::new();

    expect(&mut rx, &mut seen, "embsh> ").await?;
    tx.write_all(b"help\r").await?;
    expect(&mut rx, &mut seen, "embsh> ").await?;
    let text = String::from_utf8_lossy(&seen);
    assert!(text.contains("  help  - list registered commands\r\n"));
    assert!(text.contains("  reboot  - restart the target\r\n"));
    Ok(())
}

#[tokio::test]
async fn t_console_background_mode() -> Result<()> {
    init_tracing();
    let (client, server) = tokio::io::duplex(4096);
    let (server_read, server_write) = tokio::io::split(server);
    let (mut rx, mut tx) = tokio::io::split(client);

    let mut shell = ConsoleShell::new(demo_registry(), ConsoleConfig::default());
    shell.start(server_read, server_write)?;
    assert!(shell.is_running());

    // A second start while the session task lives is refused.
    let (_spare, spare_server) = tokio::io::duplex(64);
    let (spare_read, spare_write) = tokio::io::split(spare_server);
    assert!(matches!(
        shell.start(spare_read, spare_write),
        Err(embsh::ShellError::AlreadyRunning)
    ));

    // The background session behaves like the blocking one.
    let mut seen = Vec::new();
    expect(&mut rx, &mut seen, "embsh> ").await?;
    tx.write_all(b"hello\r").await?;
    expect(&mut rx, &mut seen, "hello\r\nHi\r\nembsh> ").await?;

    shell.stop().await?;
    assert!(!shell.is_running());
    assert!(matches!(
        shell.stop().await,
        Err(embsh::ShellError::NotRunning)
    ));
    Ok(())
}

// ---- Serial transport over an injected stream ----

#[tokio::test]
async fn t_serial_override_stream() -> Result<()> {
    let (client, server) = tokio::io::duplex(4096);
    let (server_read, server_write) = tokio::io::split(server);
    let (mut rx, mut tx) = tokio::io::split(client);

    let mut shell = SerialShell::new(demo_registry(), SerialConfig::default());
    shell.attach(server_read, server_write);
    shell.start().await?;

    let mut seen = Vec::new();
    expect(&mut rx, &mut seen, "embsh> ").await?;
    tx.write_all(b"hello\r").await?;
    expect(&mut rx, &mut seen, "Hi\r\nembsh> ").await?;

    shell.stop().await?;
    assert!(!shell.is_running());
    Ok(())
}

#[tokio::test]
async fn t_serial_missing_device_fails() {
    let mut config = SerialConfig::default();
    config.device = "/nonexistent/ttyZZ9".into();
    let mut shell = SerialShell::new(demo_registry(), config);
    assert!(matches!(
        shell.start().await,
        Err(embsh::ShellError::DeviceOpenFailed(_))
    ));
    assert!(!shell.is_running());
}

// ---- Telnet scenarios ----

async fn start_server(config: TelnetConfig) -> (TelnetServer, std::net::SocketAddr) {
    init_tracing();
    let mut config = config;
    config.port = 0; // pick a free port
    let mut server = TelnetServer::new(demo_registry(), config);
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

#[tokio::test]
async fn t_telnet_announces_options_and_banner() -> Result<()> {
    let (mut server, addr) = start_server(TelnetConfig::default()).await;

    let mut client = TcpStream::connect(addr).await?;
    let mut seen = Vec::new();
    expect(&mut client, &mut seen, "embsh> ").await?;
    // IAC WILL SGA, IAC WILL ECHO, then the banner
    assert!(seen.starts_with(&[255, 251, 3, 255, 251, 1]));
    let text = String::from_utf8_lossy(&seen);
    assert!(text.contains("=== embsh v0.1.0 ==="));

    client.write_all(b"hello\r\n").await?;
    expect(&mut client, &mut seen, "Hi\r\nembsh> ").await?;

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn t_telnet_client_iac_absorbed() -> Result<()> {
    let (mut server, addr) = start_server(TelnetConfig::default()).await;

    let mut client = TcpStream::connect(addr).await?;
    let mut seen = Vec::new();
    expect(&mut client, &mut seen, "embsh> ").await?;

    // Client negotiation noise interleaved with a command.
    client.write_all(&[255, 253, 1, 255, 252, 3]).await?;
    client.write_all(b"hello\r\n").await?;
    expect(&mut client, &mut seen, "hello\r\nHi\r\nembsh> ").await?;

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn t_telnet_auth_success_scenario() -> Result<()> {
    let mut config = TelnetConfig::default();
    config.username = Some("admin".into());
    config.password = Some("secret".into());
    let (mut server, addr) = start_server(config).await;

    let mut client = TcpStream::connect(addr).await?;
    let mut seen = Vec::new();
    expect(&mut client, &mut seen, "Username: ").await?;
    client.write_all(b"admin\r\nsecret\r\n").await?;
    expect(&mut client, &mut seen, "embsh> ").await?;

    let text = String::from_utf8_lossy(&seen);
    assert!(text.contains("Username: admin\r\nPassword: ******\r\nLogin successful.\r\n"));
    assert!(!text.contains("secret"));

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn t_telnet_auth_lockout_after_three() -> Result<()> {
    let mut config = TelnetConfig::default();
    config.username = Some("admin".into());
    config.password = Some("secret".into());
    let (mut server, addr) = start_server(config).await;

    let mut client = TcpStream::connect(addr).await?;
    let mut seen = Vec::new();
    expect(&mut client, &mut seen, "Username: ").await?;
    client
        .write_all(b"a\r\nb\r\na\r\nb\r\na\r\nb\r\n")
        .await?;
    expect(&mut client, &mut seen, "Authentication failed.\r\n").await?;

    // Server closes; read runs dry.
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, client.read(&mut buf)).await??;
    assert_eq!(n, 0);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn t_telnet_session_cap() -> Result<()> {
    let mut config = TelnetConfig::default();
    config.max_sessions = 1;
    let (mut server, addr) = start_server(config).await;

    let mut first = TcpStream::connect(addr).await?;
    let mut seen_first = Vec::new();
    expect(&mut first, &mut seen_first, "embsh> ").await?;
    assert_eq!(server.session_count(), 1);

    let mut second = TcpStream::connect(addr).await?;
    let mut seen_second = Vec::new();
    expect(&mut second, &mut seen_second, "Too many connections.\r\n").await?;
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, second.read(&mut buf)).await??;
    assert_eq!(n, 0);

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn t_telnet_slot_released_on_disconnect() -> Result<()> {
    let mut config = TelnetConfig::default();
    config.max_sessions = 1;
    let (mut server, addr) = start_server(config).await;

    {
        let mut first = TcpStream::connect(addr).await?;
        let mut seen = Vec::new();
        expect(&mut first, &mut seen, "embsh> ").await?;
        first.write_all(b"exit\r\n").await?;
        expect(&mut first, &mut seen, "Bye.\r\n").await?;
    }

    // The freed slot must be claimable again.
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let mut next = TcpStream::connect(addr).await?;
        let mut seen = Vec::new();
        if expect(&mut next, &mut seen, "embsh> ").await.is_ok() {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("slot never released");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn t_telnet_lifecycle_errors() -> Result<()> {
    let (mut server, _addr) = start_server(TelnetConfig::default()).await;
    assert!(matches!(
        server.start().await,
        Err(embsh::ShellError::AlreadyRunning)
    ));
    server.stop().await?;
    assert!(matches!(
        server.stop().await,
        Err(embsh::ShellError::NotRunning)
    ));
    Ok(())
}

#[tokio::test]
async fn t_telnet_restart_after_stop() -> Result<()> {
    let (mut server, addr) = start_server(TelnetConfig::default()).await;
    server.stop().await?;

    // Connections to the old address fail or close immediately once the
    // listener is gone; a fresh start serves again.
    server.start().await?;
    let addr2 = server.local_addr().unwrap();
    assert_ne!(addr.port(), 0);

    let mut client = TcpStream::connect(addr2).await?;
    let mut seen = Vec::new();
    expect(&mut client, &mut seen, "embsh> ").await?;

    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn t_telnet_stop_disconnects_sessions() -> Result<()> {
    let (mut server, addr) = start_server(TelnetConfig::default()).await;

    let mut client = TcpStream::connect(addr).await?;
    let mut seen = Vec::new();
    expect(&mut client, &mut seen, "embsh> ").await?;

    server.stop().await?;

    // The session task observed the latch and closed the socket.
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, client.read(&mut buf)).await??;
    assert_eq!(n, 0);
    assert_eq!(server.session_count(), 0);
    Ok(())
}
