//! Daemon lifecycle: pidfile, stale-socket cleanup, and a bounded graceful
//! drain on SIGTERM (spec §4.2, §6).

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

pub const DAEMON_GRACE_PERIOD_SECS: u64 = tentickle_core::config::DAEMON_GRACE_PERIOD_SECS;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon already running (pid {0})")]
    AlreadyRunning(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Paths + the held pidfile handle. Dropping this releases nothing by
/// itself — call [`Guard::remove`] on clean shutdown.
pub struct Guard {
    pub pid_path: PathBuf,
    pub socket_path: PathBuf,
}

/// True if `/proc/<pid>` exists — cheap, dependency-free liveness check
/// for the pidfile's previous owner (Linux-only, matches this daemon's
/// deployment target).
fn pid_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// Acquire the daemon's exclusive run slot: write our pid to `pid_path`
/// after checking any existing one isn't still alive, then make sure the
/// parent directory exists with mode 0700 and any stale socket is removed.
pub fn acquire(data_dir: impl AsRef<Path>, pid_path: &Path, socket_path: &Path) -> Result<Guard, DaemonError> {
    let data_dir = data_dir.as_ref();
    std::fs::create_dir_all(data_dir)?;
    std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o700))?;

    if let Ok(existing) = std::fs::read_to_string(pid_path) {
        if let Ok(pid) = existing.trim().parse::<u32>() {
            if pid_alive(pid) {
                return Err(DaemonError::AlreadyRunning(pid));
            }
            warn!(pid, "removing stale pidfile from a dead process");
        }
    }

    if socket_path.exists() {
        warn!(path = %socket_path.display(), "removing stale daemon socket");
        std::fs::remove_file(socket_path)?;
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(pid_path)?;
    writeln!(file, "{}", std::process::id())?;

    Ok(Guard {
        pid_path: pid_path.to_path_buf(),
        socket_path: socket_path.to_path_buf(),
    })
}

impl Guard {
    pub fn remove(&self) {
        if self.pid_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.pid_path) {
                warn!(error = %e, "failed removing pidfile");
            }
        }
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, "failed removing daemon socket");
            }
        }
    }
}

/// Wait for SIGTERM (or `Ctrl-C` for interactive/foreground runs), then
/// abort every app's sessions and return once that completes or the
/// grace period elapses, whichever comes first (spec §4.2: "SIGTERM MUST
/// trigger a graceful drain bounded to a few seconds").
pub async fn wait_for_shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler, falling back to ctrl_c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
    }
}

/// Run `drain` to completion, but give up after the grace period so a
/// wedged tool call can't block shutdown forever.
pub async fn bounded_drain<F>(drain: F)
where
    F: std::future::Future<Output = ()>,
{
    if tokio::time::timeout(Duration::from_secs(DAEMON_GRACE_PERIOD_SECS), drain)
        .await
        .is_err()
    {
        warn!(
            grace_period_secs = DAEMON_GRACE_PERIOD_SECS,
            "graceful drain did not finish within the grace period, forcing exit"
        );
    }
}
