//! `Sandbox` — the exec/mount/read contract tools use to touch the outside
//! world, and `LocalSandbox`, the process-local implementation.

use crate::{
    error::{Result, SandboxError},
    safety,
    types::{ExecOptions, ExecResult},
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// The contract an execution engine needs from its sandbox: run commands,
/// read workspace files, and know the workspace root it is bound to.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Execute `command` via `sh -c` with safety checking, timeout, and
    /// output truncation.
    async fn exec(&self, command: &str, options: ExecOptions) -> Result<ExecResult>;

    /// Read a workspace-relative file as UTF-8 text (lossy).
    async fn read(&self, relative_path: &str) -> Result<String>;

    /// The workspace root this sandbox is mounted on.
    fn workspace_root(&self) -> &Path;
}

/// A sandbox bound to a single directory on the local filesystem. Shared
/// across all sessions whose workspace path resolves to the same root.
pub struct LocalSandbox {
    root: PathBuf,
}

impl LocalSandbox {
    /// Bind a new sandbox to `root`. Does not create the directory.
    pub fn mount(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `relative_path` against the workspace root, rejecting any
    /// path that would escape it via `..` components.
    fn resolve(&self, relative_path: &str) -> Result<PathBuf> {
        let candidate = self.root.join(relative_path);
        let mut depth: i64 = 0;
        for component in Path::new(relative_path).components() {
            use std::path::Component;
            match component {
                Component::ParentDir => depth -= 1,
                Component::Normal(_) => depth += 1,
                _ => {}
            }
            if depth < 0 {
                return Err(SandboxError::PathEscape(relative_path.to_string()));
            }
        }
        Ok(candidate)
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn exec(&self, command: &str, options: ExecOptions) -> Result<ExecResult> {
        debug!("exec: {command}");

        if !options.skip_safety {
            safety::check_command(command)
                .map_err(|reason| SandboxError::CommandBlocked { reason })?;
        }

        let timeout_secs = options.effective_timeout_secs();
        let timeout_duration = std::time::Duration::from_secs(timeout_secs);
        let cwd = options
            .cwd
            .map(PathBuf::from)
            .unwrap_or_else(|| self.root.clone());

        let child = AsyncCommand::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("spawn failed: {e}")))?;

        let pid = child.id();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(child.wait_with_output().await);
        });

        match tokio::time::timeout(timeout_duration, rx).await {
            Ok(Ok(Ok(output))) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let stdout = crate::truncate::truncate_output(
                    &strip_text(&output.stdout),
                    options.max_output_chars,
                );
                let stderr = crate::truncate::truncate_output(
                    &strip_text(&output.stderr),
                    options.max_output_chars,
                );
                Ok(ExecResult { exit_code, stdout, stderr })
            }
            Ok(Ok(Err(e))) => Err(SandboxError::IoError(e)),
            Ok(Err(_recv_err)) => Err(SandboxError::Spawn(
                "wait task panicked unexpectedly".to_string(),
            )),
            Err(_elapsed) => {
                if let Some(raw_pid) = pid {
                    #[cfg(unix)]
                    unsafe {
                        libc::kill(raw_pid as libc::pid_t, libc::SIGKILL);
                    }
                    #[cfg(not(unix))]
                    {
                        let _ = std::process::Command::new("taskkill")
                            .args(["/F", "/PID", &raw_pid.to_string()])
                            .output();
                    }
                }
                Err(SandboxError::Timeout {
                    ms: timeout_secs * 1_000,
                })
            }
        }
    }

    async fn read(&self, relative_path: &str) -> Result<String> {
        let path = self.resolve(relative_path)?;
        let bytes = tokio::fs::read(&path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn workspace_root(&self) -> &Path {
        &self.root
    }
}

fn strip_text(raw: &[u8]) -> String {
    let clean = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&clean).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_echo_succeeds() {
        let sandbox = LocalSandbox::mount(std::env::temp_dir());
        let result = sandbox
            .exec("echo hello", ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn exec_blocked_command_is_rejected() {
        let sandbox = LocalSandbox::mount(std::env::temp_dir());
        let result = sandbox
            .exec("rm -rf /", ExecOptions::default())
            .await;
        assert!(matches!(result, Err(SandboxError::CommandBlocked { .. })));
    }

    #[test]
    fn resolve_rejects_parent_escape() {
        let sandbox = LocalSandbox::mount("/tmp/workspace");
        assert!(sandbox.resolve("../../etc/passwd").is_err());
        assert!(sandbox.resolve("src/main.rs").is_ok());
    }
}
