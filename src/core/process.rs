//! Child-process runner for the external tools (`yt-dlp`, `ffmpeg`).
//!
//! Tools run as separate processes so a hung network call can always be
//! cut short: the runner polls the child and kills it as soon as the
//! caller's [`AbortFlag`] is raised or the optional timeout elapses.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::error::ToolError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_TAIL: usize = 512;

/// Shared kill switch observed by in-flight tool invocations.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

pub fn run_tool(
    program: &str,
    args: &[String],
    abort: &AbortFlag,
    timeout: Option<Duration>,
) -> Result<ToolOutput, ToolError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;

    // Drain both pipes on helper threads; a full pipe would otherwise stall
    // the child while we poll it.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                let _ = child.kill();
                return Err(ToolError::Wait {
                    program: program.to_string(),
                    source,
                });
            }
        }

        if abort.is_raised() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ToolError::Aborted {
                program: program.to_string(),
            });
        }

        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::TimedOut {
                    program: program.to_string(),
                    seconds: limit.as_secs(),
                });
            }
        }

        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.map(join_drain).unwrap_or_default();
    let stderr = stderr.map(join_drain).unwrap_or_default();

    if !status.success() {
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: status.to_string(),
            stderr: stderr_tail(&stderr),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    text[start..].to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_collects_stdout() {
        let out = run_tool("sh", &sh("echo hello"), &AbortFlag::new(), None).unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    }

    #[test]
    fn test_failure_carries_stderr() {
        let err = run_tool("sh", &sh("echo broken >&2; exit 3"), &AbortFlag::new(), None)
            .unwrap_err();
        match err {
            ToolError::Failed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_abort_kills_child() {
        let abort = AbortFlag::new();
        let trigger = abort.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.raise();
        });

        let started = Instant::now();
        let err = run_tool("sh", &sh("sleep 10"), &abort, None).unwrap_err();
        assert!(matches!(err, ToolError::Aborted { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_kills_child() {
        let err = run_tool(
            "sh",
            &sh("sleep 10"),
            &AbortFlag::new(),
            Some(Duration::from_millis(200)),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = run_tool("definitely-not-a-real-tool-xyz", &[], &AbortFlag::new(), None)
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
