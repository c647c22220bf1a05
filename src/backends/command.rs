use crate::error::{Result, SwarmError};
use crate::ports::PortFuture;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

pub const MAX_OUTPUT_CAPTURE_BYTES: usize = 1_048_576;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr, trimmed and joined.
    #[must_use]
    pub fn combined(&self) -> String {
        [self.stdout.trim(), self.stderr.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs an external program to completion.
///
/// A non-zero exit is not an error; callers inspect `exit_code`.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
        cwd: Option<&'a Path>,
    ) -> PortFuture<'a, CommandOutput>;
}

#[derive(Debug, Clone, Copy)]
pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

struct StreamCapture {
    bytes: Vec<u8>,
    truncated: bool,
}

async fn capture_stream_limited<R>(mut stream: R, max_bytes: usize) -> Result<StreamCapture>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    let mut truncated = false;
    let mut chunk = [0_u8; 8_192];

    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }

        let remaining = max_bytes.saturating_sub(bytes.len());
        if remaining == 0 {
            truncated = true;
            continue;
        }

        let to_copy = remaining.min(read);
        bytes.extend_from_slice(&chunk[..to_copy]);
        if to_copy < read {
            truncated = true;
        }
    }

    Ok(StreamCapture { bytes, truncated })
}

impl CommandRunner for TokioCommandRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
        cwd: Option<&'a Path>,
    ) -> PortFuture<'a, CommandOutput> {
        Box::pin(async move {
            debug!(program, ?args, ?cwd, "Running command");
            let mut command = Command::new(program);
            command
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            if let Some(cwd) = cwd {
                command.current_dir(cwd);
            }

            let mut child = command.spawn().map_err(|err| {
                SwarmError::CommandError(format!("Failed to execute {program}: {err}"))
            })?;
            let stdout = child.stdout.take().ok_or_else(|| {
                SwarmError::CommandError(format!("Failed to capture {program} stdout"))
            })?;
            let stderr = child.stderr.take().ok_or_else(|| {
                SwarmError::CommandError(format!("Failed to capture {program} stderr"))
            })?;

            let stdout_task = tokio::spawn(capture_stream_limited(stdout, MAX_OUTPUT_CAPTURE_BYTES));
            let stderr_task = tokio::spawn(capture_stream_limited(stderr, MAX_OUTPUT_CAPTURE_BYTES));

            let status = if let Ok(wait_result) =
                tokio::time::timeout(self.timeout, child.wait()).await
            {
                wait_result?
            } else {
                let _ = child.kill().await;
                return Err(SwarmError::Timeout(format!(
                    "{program} did not finish within {}s",
                    self.timeout.as_secs()
                )));
            };

            let stdout = stdout_task.await.map_err(|err| {
                SwarmError::CommandError(format!("Failed to read {program} stdout: {err}"))
            })??;
            let stderr = stderr_task.await.map_err(|err| {
                SwarmError::CommandError(format!("Failed to read {program} stderr: {err}"))
            })??;

            Ok(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&stdout.bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr.bytes).into_owned(),
                truncated: stdout.truncated || stderr.truncated,
            })
        })
    }
}
