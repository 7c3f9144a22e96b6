use std::io::{BufReader, Read, Write};
use std::process::{Command, ExitStatus, Output, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use crossterm::cursor::MoveToColumn;
use crossterm::style::{Print, Stylize};
use crossterm::terminal::{Clear, ClearType};
use crossterm::{QueueableCommand, queue};

use crate::error::{Error, Result};

mod sanitize;

pub use sanitize::sanitize_log_line;

pub const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const SPINNER_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a watched child process: its exit status and every output
/// line it produced (stdout and stderr interleaved in arrival order).
#[derive(Debug)]
pub struct WatchedOutput {
    pub status: ExitStatus,
    pub lines: Vec<String>,
}

impl WatchedOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecCtx {
    pub dry_run: bool,
}

impl ExecCtx {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    /// Run a shell command line with inherited stdio and return its exit code.
    pub fn run_shell(&self, command_line: &str) -> Result<i32> {
        if self.dry_run {
            tracing::info!("DRY-RUN: {command_line}");
            return Ok(0);
        }
        let mut cmd = shell_command(command_line);
        let status = cmd
            .status()
            .map_err(|e| Error::msg(format!("failed to run '{command_line}': {e}")))?;
        // Killed by a signal: report as a generic failure.
        Ok(status.code().unwrap_or(1))
    }

    /// Run a command to completion, failing with its stderr (or stdout) on a
    /// non-zero exit.
    pub fn run_capture(&self, mut cmd: Command) -> Result<Output> {
        if self.dry_run {
            tracing::info!("DRY-RUN: {:?}", cmd);
            return Ok(Output {
                status: ExitStatus::default(),
                stdout: Vec::new(),
                stderr: Vec::new(),
            });
        }
        let out = cmd
            .output()
            .map_err(|e| Error::msg(format!("failed to run command {:?}: {e}", cmd)))?;
        if out.status.success() {
            return Ok(out);
        }
        Err(Error::msg(format!(
            "command failed: {}",
            command_summary(&out)
        )))
    }

    /// Run `cmd`, buffering its output while a spinner labelled `label`
    /// animates on stdout. The exit status is returned, not judged.
    pub fn run_with_spinner(&self, mut cmd: Command, label: &str) -> Result<WatchedOutput> {
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::msg(format!("failed to spawn {:?}: {e}", cmd)))?;

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(err, tx));
        }
        drop(tx);

        let mut lines = Vec::new();
        let mut frame = 0usize;
        let mut last_draw = Instant::now();
        draw_spinner(label, frame);
        loop {
            match rx.recv_timeout(SPINNER_INTERVAL) {
                Ok(line) => {
                    tracing::debug!("{}", sanitize_log_line(&line));
                    lines.push(line);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if last_draw.elapsed() >= SPINNER_INTERVAL {
                frame = (frame + 1) % SPINNER_FRAMES.len();
                draw_spinner(label, frame);
                last_draw = Instant::now();
            }
        }
        clear_spinner();

        let status = child
            .wait()
            .map_err(|e| Error::msg(format!("wait failed: {e}")))?;
        Ok(WatchedOutput { status, lines })
    }
}

fn shell_command(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command_line);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command_line);
        cmd
    }
}

pub fn command_summary(out: &Output) -> String {
    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if !stdout.is_empty() {
        return stdout;
    }
    format!("status {}", out.status)
}

fn draw_spinner(label: &str, frame: usize) {
    let mut stdout = std::io::stdout();
    let text = format!("{label} {}", SPINNER_FRAMES[frame].cyan());
    // Spinner output is cosmetic; a closed stdout must not fail the build.
    let _ = queue!(
        stdout,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(text)
    );
    let _ = stdout.flush();
}

fn clear_spinner() {
    let mut stdout = std::io::stdout();
    let _ = stdout.queue(MoveToColumn(0));
    let _ = stdout.queue(Clear(ClearType::CurrentLine));
    let _ = stdout.flush();
}

fn read_output_stream<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    // Progress output without newlines is flushed in chunks.
    const MAX_PENDING_BYTES: usize = 16 * 1024;
    let mut r = BufReader::new(reader);
    let mut buf = [0u8; 8192];
    let mut pending = Vec::with_capacity(1024);

    loop {
        let n = match r.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for b in &buf[..n] {
            if *b == b'\n' {
                let line = String::from_utf8_lossy(&pending)
                    .trim_end_matches('\r')
                    .to_string();
                pending.clear();
                if tx.send(line).is_err() {
                    return;
                }
            } else {
                pending.push(*b);
                if pending.len() >= MAX_PENDING_BYTES {
                    let line = String::from_utf8_lossy(&pending).into_owned();
                    pending.clear();
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn spinner_run_collects_both_streams_and_status() {
        let ctx = ExecCtx::default();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err 1>&2; exit 3");
        let res = ctx.run_with_spinner(cmd, "Testing").unwrap();
        assert!(!res.success());
        assert_eq!(res.status.code(), Some(3));
        let mut lines = res.lines.clone();
        lines.sort();
        assert_eq!(lines, ["err", "out"]);
    }

    #[test]
    fn shell_exit_code_is_forwarded() {
        let ctx = ExecCtx::default();
        assert_eq!(ctx.run_shell("exit 0").unwrap(), 0);
        assert_eq!(ctx.run_shell("exit 42").unwrap(), 42);
    }

    #[test]
    fn capture_reports_stderr_on_failure() {
        let ctx = ExecCtx::default();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo broken 1>&2; exit 1");
        let err = ctx.run_capture(cmd).unwrap_err().to_string();
        assert!(err.contains("broken"), "unexpected err: {err}");
    }

    #[test]
    fn long_unterminated_output_is_chunked() {
        let (tx, rx) = mpsc::channel();
        let data = vec![b'#'; 40 * 1024];
        read_output_stream(&data[..], tx);
        let chunks: Vec<String> = rx.iter().collect();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 16 * 1024));
        assert_eq!(chunks.iter().map(String::len).sum::<usize>(), 40 * 1024);
    }

    #[test]
    fn dry_run_skips_execution() {
        let ctx = ExecCtx::new(true);
        assert_eq!(ctx.run_shell("exit 9").unwrap(), 0);
    }
}
