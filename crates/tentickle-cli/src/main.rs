//! `tentickle` — the CLI surface for the daemon (spec §6): `tentickle`
//! (default, auto-detect + attach), `start`, `stop`, `status`. Talks to the
//! running daemon over its Unix socket using the same `req`/`res` frames the
//! WebSocket and in-process transports use; actual daemonization (fork,
//! pidfile mechanics) is the out-of-scope "daemon process lifecycle
//! scaffolding" spec §1 names as an external collaborator — this binary
//! only spawns/signals `tentickled` as an ordinary child process.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tentickle_protocol::frames::{ReqFrame, ResFrame};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

const EXIT_OK: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_UNREACHABLE: i32 = 2;

/// Bounded wait for the daemon to come up or go down, matching the
/// daemon's own SIGTERM grace period (spec §4.2).
const START_TIMEOUT_SECS: u64 = 5;
const STOP_TIMEOUT_SECS: u64 = 5;

#[derive(Parser, Debug)]
#[command(name = "tentickle", about = "tentickle agent runtime control")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon.
    Start {
        /// Stay attached to this terminal instead of backgrounding.
        #[arg(long)]
        foreground: bool,
        /// Override the gateway's listen port.
        #[arg(long)]
        port: Option<u16>,
        /// Name of the default App to mint sessions under.
        #[arg(long)]
        agent: Option<String>,
    },
    /// Stop the running daemon (SIGTERM, bounded graceful drain).
    Stop,
    /// Report whether the daemon is running.
    Status,
}

fn socket_path() -> PathBuf {
    std::env::var("TENTICKLE_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(tentickle_core::config::data_dir()).join("daemon.sock"))
}

fn pid_path() -> PathBuf {
    PathBuf::from(tentickle_core::config::data_dir()).join("daemon.pid")
}

fn read_pid() -> Option<u32> {
    std::fs::read_to_string(pid_path()).ok()?.trim().parse().ok()
}

fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

fn daemon_binary() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("tentickled");
            if sibling.exists() {
                return sibling;
            }
        }
    }
    PathBuf::from("tentickled")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tentickle_cli=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Some(Command::Start { foreground, port, agent }) => cmd_start(foreground, port, agent).await,
        Some(Command::Stop) => cmd_stop().await,
        Some(Command::Status) => cmd_status().await,
        None => cmd_default().await,
    };
    std::process::exit(code);
}

/// `tentickle` with no subcommand: attach to an already-running daemon, or
/// start one in the foreground. Rendering an interactive TUI over that
/// connection is out of scope here (spec §1 Non-goals) — this prints the
/// same status a human would otherwise read off the TUI's status line.
async fn cmd_default() -> i32 {
    if read_pid().filter(|pid| pid_alive(*pid)).is_some() {
        println!("tentickle daemon is already running");
        return cmd_status().await;
    }
    cmd_start(true, None, None).await
}

async fn cmd_start(foreground: bool, port: Option<u16>, agent: Option<String>) -> i32 {
    if let Some(pid) = read_pid() {
        if pid_alive(pid) {
            eprintln!("tentickle daemon already running (pid {pid})");
            return EXIT_ERROR;
        }
    }

    let binary = daemon_binary();
    let mut command = std::process::Command::new(&binary);
    if let Some(port) = port {
        command.arg("--port").arg(port.to_string());
    }
    if let Some(agent) = &agent {
        command.arg("--agent").arg(agent);
    }

    if foreground {
        command.arg("--foreground");
        let err = command.exec();
        eprintln!("failed to exec {}: {err}", binary.display());
        return EXIT_ERROR;
    }

    let data_dir = tentickle_core::config::data_dir();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data dir {data_dir}: {e}");
        return EXIT_ERROR;
    }
    let log_path = PathBuf::from(&data_dir).join("daemon.log");
    let log_file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("failed to open daemon log {}: {e}", log_path.display());
            return EXIT_ERROR;
        }
    };
    let log_file_err = match log_file.try_clone() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("failed to clone log handle: {e}");
            return EXIT_ERROR;
        }
    };

    let spawned = command
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err))
        .spawn();

    match spawned {
        Ok(_child) => {
            let socket = socket_path();
            let deadline = tokio::time::Instant::now() + Duration::from_secs(START_TIMEOUT_SECS);
            while tokio::time::Instant::now() < deadline {
                if socket.exists() && UnixStream::connect(&socket).await.is_ok() {
                    println!("tentickle daemon started");
                    return EXIT_OK;
                }
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
            eprintln!("daemon did not come up within {START_TIMEOUT_SECS}s, see {}", log_path.display());
            EXIT_UNREACHABLE
        }
        Err(e) => {
            eprintln!("failed to spawn {}: {e}", binary.display());
            EXIT_ERROR
        }
    }
}

async fn cmd_stop() -> i32 {
    let Some(pid) = read_pid() else {
        eprintln!("tentickle daemon is not running");
        return EXIT_UNREACHABLE;
    };
    if !pid_alive(pid) {
        eprintln!("tentickle daemon is not running (stale pidfile)");
        return EXIT_UNREACHABLE;
    }

    // SAFETY: `pid` came from our own pidfile; sending SIGTERM to a process
    // that may have already exited between the liveness check and this call
    // is harmless (kill(2) just returns ESRCH).
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(STOP_TIMEOUT_SECS);
    while tokio::time::Instant::now() < deadline {
        if !pid_alive(pid) {
            println!("tentickle daemon stopped");
            return EXIT_OK;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
    eprintln!("daemon did not exit within {STOP_TIMEOUT_SECS}s grace period");
    EXIT_ERROR
}

async fn cmd_status() -> i32 {
    let pid = read_pid();
    let alive = pid.is_some_and(pid_alive);
    if !alive {
        println!("{{\"running\": false}}");
        return EXIT_UNREACHABLE;
    }

    match request_status().await {
        Ok(payload) => {
            println!("{}", serde_json::json!({ "running": true, "pid": pid, "agents": payload }));
            EXIT_OK
        }
        Err(e) => {
            eprintln!("daemon process is alive but socket is unreachable: {e}");
            EXIT_UNREACHABLE
        }
    }
}

async fn request_status() -> anyhow::Result<serde_json::Value> {
    let socket = socket_path();
    let stream = UnixStream::connect(&socket).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let req = ReqFrame {
        frame_type: "req".to_string(),
        id: uuid::Uuid::now_v7().to_string(),
        session_id: None,
        method: tentickle_protocol::methods::AGENT_LIST.to_string(),
        params: None,
    };
    let line = serde_json::to_string(&req)?;
    write_half.write_all(line.as_bytes()).await?;
    write_half.write_all(b"\n").await?;

    let Some(response) = lines.next_line().await? else {
        anyhow::bail!("daemon closed the connection without responding");
    };
    let res: ResFrame = serde_json::from_str(&response)?;
    if res.ok {
        Ok(res.payload.unwrap_or(serde_json::Value::Null))
    } else {
        let message = res.error.map(|e| e.message).unwrap_or_else(|| "unknown error".to_string());
        anyhow::bail!(message)
    }
}
