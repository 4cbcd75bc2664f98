//! Shell execution for `run_command`: configured shell, timeout with a
//! graceful kill, captured output with truncation.

use std::{path::PathBuf, time::Duration};

use {
    anyhow::{Result, bail},
    serde::Serialize,
    tokio::io::AsyncReadExt,
    tracing::{debug, warn},
};

use torbo_common::text::truncate_output;

/// Character cap on captured stdout/stderr.
pub const MAX_OUTPUT_CHARS: usize = 50_000;

/// Grace period between SIGTERM and SIGKILL on timeout.
const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone)]
pub struct ExecOpts {
    pub shell: String,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

impl Default for ExecOpts {
    fn default() -> Self {
        Self {
            shell: "sh".into(),
            timeout: Duration::from_secs(30),
            working_dir: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("timeout after {0}s")]
pub struct ExecTimeout(pub u64);

/// Run a command under the configured shell. On timeout the child gets
/// SIGTERM, then SIGKILL after the grace period, and an [`ExecTimeout`]
/// error is returned.
pub async fn exec_command(command: &str, opts: &ExecOpts) -> Result<ExecResult> {
    debug!(command, timeout_secs = opts.timeout.as_secs(), "exec_command");

    let mut cmd = tokio::process::Command::new(&opts.shell);
    cmd.arg("-c").arg(command);
    if let Some(ref dir) = opts.working_dir {
        cmd.current_dir(dir);
    }
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.stdin(std::process::Stdio::null());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            if let Some(ref dir) = opts.working_dir {
                anyhow::anyhow!(
                    "failed to start command: working directory '{}' does not exist",
                    dir.display()
                )
            } else {
                anyhow::anyhow!("failed to start command: shell '{}' not found", opts.shell)
            }
        } else {
            anyhow::anyhow!("failed to start command: {e}")
        }
    })?;

    // Drain both pipes concurrently so neither can fill and stall the child.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    let status = match tokio::time::timeout(opts.timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => bail!("failed to run command: {e}"),
        Err(_) => {
            warn!(command, "exec timeout, terminating child");
            terminate_with_grace(&mut child).await;
            return Err(ExecTimeout(opts.timeout.as_secs()).into());
        },
    };

    let stdout_bytes = stdout_task.await.unwrap_or_default();
    let stderr_bytes = stderr_task.await.unwrap_or_default();
    let mut stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
    let mut stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();
    truncate_output(&mut stdout, MAX_OUTPUT_CHARS);
    truncate_output(&mut stderr, MAX_OUTPUT_CHARS);

    let exit_code = status.code().unwrap_or(-1);
    debug!(exit_code, stdout_len = stdout.len(), stderr_len = stderr.len(), "exec done");

    Ok(ExecResult {
        stdout,
        stderr,
        exit_code,
    })
}

/// SIGTERM first; escalate to SIGKILL after the grace period. The `kill`
/// utility delivers the TERM signal since this stack carries no raw libc
/// binding.
async fn terminate_with_grace(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = tokio::process::Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}
