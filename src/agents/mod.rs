//! Agent lifecycle management.
//!
//! All agents share one worker subprocess. Starting it marks every known agent
//! as running; stopping it marks them all stopped. Per-agent status lives in
//! the `agent_status` table so it survives restarts of the panel itself.
//!
//! - `start` is idempotent: a second call while the worker is alive is a no-op
//! - `stop` sends SIGTERM and waits up to the configured timeout, never kills

mod process;

pub use process::{ProcessError, StopOutcome, WorkerProcess};

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::config::AgentCommand;
use crate::db::{AgentStatus, ExecutionStatus, Store};

pub struct AgentManager {
    command: AgentCommand,
    agent_names: Vec<String>,
    stop_timeout: Duration,
    store: Store,
    process: Mutex<Option<WorkerProcess>>,
}

impl AgentManager {
    pub fn new(
        command: AgentCommand,
        agent_names: Vec<String>,
        stop_timeout: Duration,
        store: Store,
    ) -> Self {
        Self {
            command,
            agent_names,
            stop_timeout,
            store,
            process: Mutex::new(None),
        }
    }

    pub fn agent_names(&self) -> &[String] {
        &self.agent_names
    }

    fn lock(&self) -> MutexGuard<'_, Option<WorkerProcess>> {
        match self.process.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Spawn the worker process. Returns `false` if it is already running or
    /// could not be spawned.
    ///
    /// The process lock is held until the status rows are written, so a
    /// concurrent `stop` observes either none or all of the start.
    pub fn start(&self) -> bool {
        let mut slot = self.lock();
        if let Some(process) = slot.as_mut() {
            if process.is_alive() {
                tracing::info!("Agents already running (pid {})", process.id());
                return false;
            }
            // Exited on its own; the stale handle is replaced below.
            *slot = None;
        }

        let process = match WorkerProcess::spawn(&self.command) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!("Error starting agents: {}", e);
                return false;
            }
        };
        tracing::info!(
            pid = process.id(),
            program = %self.command.program,
            "Agents started"
        );
        *slot = Some(process);

        if let Err(e) = self.store.set_agents_running(&self.agent_names, true) {
            tracing::error!("Error updating agent status: {}", e);
        }
        true
    }

    /// Ask the worker to exit. Returns `false` if there was nothing to stop.
    ///
    /// The handle is cleared and every agent is marked stopped even when the
    /// process did not confirm its exit within the timeout. The process lock
    /// is held throughout, so a `start` issued meanwhile waits and then
    /// spawns a fresh worker.
    pub fn stop(&self) -> bool {
        let mut slot = self.lock();
        let Some(mut process) = slot.take() else {
            return false;
        };

        if !process.is_alive() {
            tracing::info!("Agent process had already exited");
        } else {
            self.terminate(&mut process);
        }

        if let Err(e) = self.store.set_agents_running(&self.agent_names, false) {
            tracing::error!("Error updating agent status: {}", e);
        }
        drop(slot);
        true
    }

    fn terminate(&self, process: &mut WorkerProcess) {
        match process.terminate() {
            Ok(()) => match process.wait_timeout(self.stop_timeout) {
                Ok(StopOutcome::Exited) => tracing::info!("Agents stopped"),
                Ok(StopOutcome::TimedOut) => tracing::warn!(
                    pid = process.id(),
                    "Agent process did not exit within {:?}",
                    self.stop_timeout
                ),
                Err(e) => tracing::warn!("Error waiting for agent process: {}", e),
            },
            Err(e) => tracing::warn!("Error stopping agents: {}", e),
        }
    }

    /// True while a worker handle exists and the process has not exited.
    pub fn is_running(&self) -> bool {
        self.lock().as_mut().is_some_and(|process| process.is_alive())
    }

    /// Status of every known agent, in configuration order.
    pub fn statuses(&self) -> Vec<AgentStatus> {
        self.store
            .agent_statuses(&self.agent_names)
            .unwrap_or_else(|e| {
                tracing::error!("Error getting agent status: {}", e);
                self.agent_names
                    .iter()
                    .map(|name| AgentStatus::not_initialized(name.as_str()))
                    .collect()
            })
    }

    /// Log an ad-hoc agent action as a running execution record.
    pub fn record_action(
        &self,
        agent_name: &str,
        task_type: &str,
        result: Option<&str>,
    ) -> Option<i64> {
        match self
            .store
            .record_execution(agent_name, task_type, ExecutionStatus::Running, result)
        {
            Ok(id) => {
                tracing::debug!(agent = agent_name, task_type, id, "Recorded agent action");
                Some(id)
            }
            Err(e) => {
                tracing::error!("Error recording action for {}: {}", agent_name, e);
                None
            }
        }
    }

    /// Complete an execution record. Returns `false` if it does not exist,
    /// was already completed or the store failed.
    pub fn complete_action(&self, id: i64, status: ExecutionStatus, result: Option<&str>) -> bool {
        match self.store.complete_execution(id, status, result) {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(id, "Execution record already completed");
                false
            }
            Err(e) => {
                tracing::error!("Error completing action {}: {}", id, e);
                false
            }
        }
    }
}

impl Drop for AgentManager {
    fn drop(&mut self) {
        self.stop();
    }
}
