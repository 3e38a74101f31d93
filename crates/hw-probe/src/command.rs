use crate::{ProbeError, Result};
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// Upper bound for any external tool the probe runs.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

const WAIT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr; ffmpeg reports progress on stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Run `program` with `args`, killing it once `timeout` elapses.
pub fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    debug!(program, ?args, "running");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProbeError::Spawn {
            program: program.to_string(),
            source,
        })?;

    // Pipes are drained concurrently so a chatty child cannot block on a full buffer.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProbeError::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
        thread::sleep(WAIT_POLL);
    };

    let collect = |h: Option<JoinHandle<String>>| h.and_then(|h| h.join().ok()).unwrap_or_default();
    Ok(CommandOutput {
        success: status.success(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = run_command("definitely-not-a-real-tool-42", &[], COMMAND_TIMEOUT).unwrap_err();
        assert!(matches!(err, ProbeError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_output() {
        let out = run_command("sh", &["-c", "echo hello; echo oops >&2"], COMMAND_TIMEOUT).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.combined().contains("oops"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let started = Instant::now();
        let err = run_command("sleep", &["5"], Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ProbeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
