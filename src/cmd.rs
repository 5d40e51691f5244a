use std::{
    io::{self, Read},
    process::{Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::error::InstallerError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ── Data types ────────────────────────────────────────────────────────────────

/// What an inspection command left behind: its stdout and exit code.
/// Stdout is kept even when the command exits non-zero, so callers can tell
/// "could not run" (an `Err`) apart from "ran and reported nothing".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOutput {
    pub stdout: String,
    pub code: i32,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn not_found_or_io(program: &str, err: io::Error) -> InstallerError {
    if err.kind() == io::ErrorKind::NotFound {
        InstallerError::CommandNotFound(program.to_string())
    } else {
        InstallerError::Io(err)
    }
}

/// Reads a child pipe to completion on its own thread so a chatty command
/// cannot block on a full pipe while we poll for its exit.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Run a command, capture its stdout and exit code.
///
/// A non-zero exit is **not** an error here; the caller decides whether it
/// means failure or absence. The child is killed once `timeout` elapses.
pub fn run_capture(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CmdOutput, InstallerError> {
    log::debug!("Running command: {} {:?}", program, args);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| not_found_or_io(program, e))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(InstallerError::CommandTimedOut(
                program.to_string(),
                timeout.as_secs(),
            ));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = String::from_utf8_lossy(&stdout.join().unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr.join().unwrap_or_default()).into_owned();
    let code = status.code().unwrap_or(-1);

    if !stderr.trim().is_empty() {
        log::debug!("{} stderr: {}", program, stderr.trim());
    }
    log::debug!("{} exited with status {}", program, code);

    Ok(CmdOutput { stdout, code })
}

/// Run a command that **takes over the terminal** (stdin/stdout/stderr inherited).
/// Used for the `--exec` bootstrap hook.
pub fn run_interactive(program: &str, args: &[&str]) -> Result<(), InstallerError> {
    log::info!("Handing the terminal to: {} {:?}", program, args);

    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| not_found_or_io(program, e))?;

    if !status.success() {
        return Err(InstallerError::CommandFailed(
            program.to_string(),
            status.code().unwrap_or(-1),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_on_non_zero_exit() {
        let out = run_capture("sh", &["-c", "echo partial; exit 3"], Duration::from_secs(5))
            .unwrap();
        assert_eq!(out.stdout, "partial\n");
        assert_eq!(out.code, 3);
        assert!(!out.success());
    }

    #[test]
    fn missing_program_is_command_not_found() {
        let err = run_capture("definitely-not-a-real-binary", &[], Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, InstallerError::CommandNotFound(p) if p == "definitely-not-a-real-binary"));
    }

    #[test]
    fn slow_command_times_out() {
        let err = run_capture("sleep", &["5"], Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, InstallerError::CommandTimedOut(p, _) if p == "sleep"));
    }
}
