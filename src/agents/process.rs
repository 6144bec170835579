//! Owned handle to the collective worker subprocess.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::AgentCommand;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal worker process: {0}")]
    Signal(std::io::Error),

    #[error("Failed to query worker process: {0}")]
    Wait(std::io::Error),
}

pub type ProcessResult<T> = Result<T, ProcessError>;

/// How a graceful stop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Exited,
    TimedOut,
}

pub struct WorkerProcess {
    child: Child,
}

impl WorkerProcess {
    /// Spawn the worker with stdout and stderr captured and forwarded to the log.
    pub fn spawn(command: &AgentCommand) -> ProcessResult<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, "stderr");
        }

        Ok(Self { child })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// True while the process has not exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the process to exit (SIGTERM on unix).
    pub fn terminate(&mut self) -> ProcessResult<()> {
        #[cfg(unix)]
        {
            let pid = self.child.id() as libc::pid_t;
            // SAFETY: kill(2) has no memory-safety preconditions.
            let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
            if rc != 0 {
                return Err(ProcessError::Signal(std::io::Error::last_os_error()));
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            self.child.kill().map_err(ProcessError::Signal)
        }
    }

    /// Poll for exit until `timeout` elapses. Never escalates to a kill.
    pub fn wait_timeout(&mut self, timeout: Duration) -> ProcessResult<StopOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.child.try_wait().map_err(ProcessError::Wait)?.is_some() {
                return Ok(StopOutcome::Exited);
            }
            if Instant::now() >= deadline {
                return Ok(StopOutcome::TimedOut);
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

/// Drain a pipe on its own thread so the worker never blocks on a full buffer.
fn forward_output<R: Read + Send + 'static>(pipe: R, stream: &'static str) {
    let spawned = std::thread::Builder::new()
        .name(format!("agent-{}", stream))
        .spawn(move || {
            for line in BufReader::new(pipe).lines() {
                match line {
                    Ok(line) => tracing::debug!(target: "agent_panel::worker", stream, "{}", line),
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Failed to start {} forwarder: {}", stream, e);
    }
}
