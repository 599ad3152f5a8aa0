//! Child processes with a wall-clock limit and bounded captured output.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

const CHUNK: usize = 8192;

/// Limits applied to one child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is counted and dropped.
    pub output_limit_bytes: usize,
}

/// The kept prefix of one output stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    fn push_note(&self, name: &str, out: &mut String) {
        if self.dropped > 0 {
            out.push_str(&format!("\n[{name} truncated {} bytes]\n", self.dropped));
        }
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// stdout followed by stderr, with a note when either was cut.
    pub fn combined_text(&self) -> String {
        let mut text = self.stdout.text();
        self.stdout.push_note("stdout", &mut text);
        let stderr = self.stderr.text();
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        self.stderr.push_note("stderr", &mut text);
        text
    }
}

/// Run `cmd` with stdin closed, draining both pipes on reader threads so a
/// chatty child cannot block on a full pipe. A child that outlives the
/// timeout is killed and reported with `timed_out`.
#[instrument(skip_all, fields(timeout_secs = bounds.timeout.as_secs()))]
pub fn run_bounded(mut cmd: Command, bounds: Bounds) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout = capture(stdout, bounds.output_limit_bytes);
    let stderr = capture(stderr, bounds.output_limit_bytes);

    let waited = child
        .wait_timeout(bounds.timeout)
        .context("wait for command")?;
    let (status, timed_out) = match waited {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = bounds.timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let output = CommandOutput {
        status,
        stdout: collect(stdout).context("collect stdout")?,
        stderr: collect(stderr).context("collect stderr")?,
        timed_out,
    };
    debug!(
        exit_code = ?output.status.code(),
        timed_out,
        stdout_dropped = output.stdout.dropped,
        stderr_dropped = output.stderr.dropped,
        "command finished"
    );
    Ok(output)
}

fn capture<R: Read + Send + 'static>(reader: R, limit: usize) -> JoinHandle<Result<Captured>> {
    thread::spawn(move || read_limited(reader, limit))
}

fn collect(handle: JoinHandle<Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; CHUNK];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    fn bounds(timeout: Duration, limit: usize) -> Bounds {
        Bounds {
            timeout,
            output_limit_bytes: limit,
        }
    }

    #[test]
    fn captures_both_streams() {
        let out = run_bounded(
            sh("echo out; echo err >&2"),
            bounds(Duration::from_secs(10), 1024),
        )
        .expect("run");
        assert!(out.success());
        assert_eq!(out.stdout.text(), "out\n");
        assert_eq!(out.combined_text(), "out\nerr\n");
    }

    #[test]
    fn truncates_beyond_limit() {
        let out = run_bounded(sh("printf 0123456789"), bounds(Duration::from_secs(10), 4))
            .expect("run");
        assert_eq!(
            out.stdout,
            Captured {
                bytes: b"0123".to_vec(),
                dropped: 6
            }
        );
        assert!(out.combined_text().contains("[stdout truncated 6 bytes]"));
    }

    #[test]
    fn kills_on_timeout() {
        let out = run_bounded(sh("exec sleep 5"), bounds(Duration::from_millis(200), 1024))
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let err = run_bounded(
            Command::new("definitely-not-a-real-binary-oracle"),
            bounds(Duration::from_secs(1), 16),
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }
}
