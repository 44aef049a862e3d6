//! Out-of-process tool execution.
//!
//! Tools are spawned from an argument vector (no shell), with stdin closed and
//! `kill_on_drop` set, so dropping an invocation future kills the child.
//! Output is captured into capped buffers and the whole run is bounded by a
//! wall-clock budget.

use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::error::BackendError;
use super::tools::Tool;

const READ_CHUNK: usize = 8 * 1024;
const STDERR_SUMMARY_LINES: usize = 5;
const STDERR_SUMMARY_CHARS: usize = 500;

/// Captured result of a successful tool run.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

/// Spawns allow-listed tools with bounded time and output.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_output_bytes: usize,
}

impl ProcessRunner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// Runs `program` to completion. Fails on spawn errors, timeout, output
    /// overflow and nonzero exit.
    pub async fn run(
        &self,
        tool: Tool,
        program: &Path,
        args: &[OsString],
        budget: Duration,
    ) -> Result<ProcessOutput, BackendError> {
        debug!(tool = tool.name(), program = %program.display(), ?args, "Spawning tool");
        let started = Instant::now();

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    BackendError::Unavailable {
                        tool: tool.name().to_string(),
                        reason: format!("{} not found", program.display()),
                    }
                } else {
                    BackendError::Io(e)
                }
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::failed("stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| BackendError::failed("stderr was not captured"))?;
        let limit = self.max_output_bytes;

        let result = timeout(budget, async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let mut out_open = true;
            let mut err_open = true;

            while out_open || err_open {
                tokio::select! {
                    more = read_capped(&mut stdout, &mut out, limit, tool), if out_open => {
                        out_open = more?;
                    }
                    more = read_capped(&mut stderr, &mut err, limit, tool), if err_open => {
                        err_open = more?;
                    }
                }
            }

            let status = child.wait().await?;
            Ok::<_, BackendError>((status, out, err))
        })
        .await;

        let elapsed = started.elapsed();
        match result {
            Ok(Ok((status, stdout, stderr))) => {
                debug!(tool = tool.name(), ?status, ?elapsed, "Tool finished");
                if !status.success() {
                    return Err(BackendError::NonZeroExit {
                        tool: tool.name().to_string(),
                        code: status.code(),
                        stderr: summarize_stderr(&stderr),
                    });
                }
                Ok(ProcessOutput {
                    status,
                    stdout,
                    stderr,
                    elapsed,
                })
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                warn!(tool = tool.name(), error = %e, "Tool run aborted");
                Err(e)
            }
            Err(_) => {
                let _ = child.kill().await;
                warn!(tool = tool.name(), ?budget, "Tool timed out, killed");
                Err(BackendError::Timeout {
                    tool: tool.name().to_string(),
                    budget,
                })
            }
        }
    }
}

/// Reads one chunk into `buffer`. Returns `false` at EOF.
async fn read_capped<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    limit: usize,
    tool: Tool,
) -> Result<bool, BackendError> {
    let mut chunk = [0u8; READ_CHUNK];
    let read = reader.read(&mut chunk).await?;
    if read == 0 {
        return Ok(false);
    }
    if buffer.len() + read > limit {
        return Err(BackendError::OutputTooLarge {
            tool: tool.name().to_string(),
            limit,
        });
    }
    buffer.extend_from_slice(&chunk[..read]);
    Ok(true)
}

/// Last few non-empty stderr lines, bounded in length.
pub fn summarize_stderr(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_SUMMARY_LINES);
    let mut summary = lines[start..].join("; ");
    if summary.chars().count() > STDERR_SUMMARY_CHARS {
        summary = summary.chars().take(STDERR_SUMMARY_CHARS).collect();
        summary.push_str("...");
    }
    summary
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<OsString> {
        vec!["-c".into(), script.into()]
    }

    #[tokio::test]
    async fn test_run_success_captures_stdout() {
        let runner = ProcessRunner::new(1024);
        let output = runner
            .run(Tool::Ffmpeg, Path::new("/bin/sh"), &sh("echo hello"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_nonzero_exit() {
        let runner = ProcessRunner::new(1024);
        let err = runner
            .run(
                Tool::Ffmpeg,
                Path::new("/bin/sh"),
                &sh("echo 'first' >&2; echo 'bad input' >&2; exit 3"),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        match err {
            BackendError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "first; bad input");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_timeout_kills() {
        let runner = ProcessRunner::new(1024);
        let started = Instant::now();
        let err = runner
            .run(Tool::YtDlp, Path::new("/bin/sh"), &sh("sleep 30"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_output_too_large() {
        let runner = ProcessRunner::new(16);
        let err = runner
            .run(
                Tool::Ffmpeg,
                Path::new("/bin/sh"),
                &sh("printf '%0100d' 0"),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::OutputTooLarge { limit: 16, .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let runner = ProcessRunner::new(16);
        let err = runner
            .run(
                Tool::Soffice,
                Path::new("/nonexistent/soffice"),
                &[],
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { .. }));
    }

    #[test]
    fn test_summarize_stderr_keeps_tail() {
        let stderr = b"1\n2\n\n3\n4\n5\n6\n";
        assert_eq!(summarize_stderr(stderr), "2; 3; 4; 5; 6");
        let long = vec![b'x'; 2000];
        assert!(summarize_stderr(&long).len() <= STDERR_SUMMARY_CHARS + 3);
    }
}
