//! Process execution confined to the workspace root.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::limits::{ExecLimits, LimitedBuffer};

/// Environment variables passed through to spawned programs. Everything
/// else is cleared.
const INHERITED_ENV: &[&str] = &["PATH", "LANG", "LC_ALL", "TZ"];

/// Ways running code in the workspace can fail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionFailure {
    /// The wall-clock timeout elapsed; the process was killed and its
    /// partial output discarded.
    #[error("execution timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// The timeout that elapsed
        timeout: Duration,
    },
    /// The process ran to completion with a non-zero exit code.
    #[error("process exited with code {exit_code}")]
    NonZeroExit {
        /// Exit code (-1 when terminated by a signal)
        exit_code: i32,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },
    /// The process could not be started.
    #[error("failed to start '{program}': {reason}")]
    Spawn {
        /// Program that was requested
        program: String,
        /// OS error description
        reason: String,
    },
}

/// Result of a process that ran to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code (-1 when terminated by a signal)
    pub exit_code: i32,
    /// Standard output (lossy UTF-8)
    pub stdout: String,
    /// Standard error (lossy UTF-8)
    pub stderr: String,
    /// Whether either stream was truncated due to limits
    pub truncated: bool,
    /// Wall clock time in milliseconds
    pub wall_time_ms: u64,
}

impl ExecutionResult {
    /// Returns true if the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run `program` with `cwd` as working directory under `limits`.
pub(crate) async fn run(
    cwd: &Path,
    program: &str,
    args: &[String],
    limits: &ExecLimits,
) -> Result<ExecutionResult, ExecutionFailure> {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for key in INHERITED_ENV {
        if let Ok(value) = std::env::var(key) {
            command.env(key, value);
        }
    }
    command
        .env("HOME", cwd)
        .env("PYTHONDONTWRITEBYTECODE", "1");

    let started = Instant::now();
    let mut child = command.spawn().map_err(|e| ExecutionFailure::Spawn {
        program: program.to_string(),
        reason: e.to_string(),
    })?;

    let limit = usize::try_from(limits.max_output_bytes).unwrap_or(usize::MAX);
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let outcome = tokio::time::timeout(limits.timeout, async {
        tokio::join!(drain(stdout, limit), drain(stderr, limit), child.wait())
    })
    .await;

    let (stdout, stderr, status) = match outcome {
        Ok(done) => done,
        Err(_) => {
            tracing::warn!(program, timeout_ms = limits.timeout.as_millis() as u64, "killing timed out process");
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(ExecutionFailure::Timeout {
                timeout: limits.timeout,
            });
        }
    };

    let status = status.map_err(|e| ExecutionFailure::Spawn {
        program: program.to_string(),
        reason: e.to_string(),
    })?;

    let truncated = stdout.was_truncated() || stderr.was_truncated();
    Ok(ExecutionResult {
        exit_code: status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&stdout.into_bytes()).into_owned(),
        stderr: String::from_utf8_lossy(&stderr.into_bytes()).into_owned(),
        truncated,
        wall_time_ms: started.elapsed().as_millis() as u64,
    })
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> LimitedBuffer {
    let mut buffer = LimitedBuffer::new(limit);
    let Some(mut reader) = reader else {
        return buffer;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buffer.write(&chunk[..n]);
            }
        }
    }
    buffer
}
