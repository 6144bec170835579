//! Recurring task scheduler.
//!
//! A single background thread wakes once per polling interval and runs one
//! sweep: every active task whose `next_run` has passed fires in that sweep.
//! Firing is polling based, so a task runs up to one interval after its
//! `next_run`.
//!
//! # Task states
//! - `Active(next_run)` -> fired -> `Active(next_run + interval)` for recurring kinds
//! - `Active(next_run)` -> fired -> `Inactive` for `once`
//!
//! A sweep is one SQLite transaction. If the store fails mid-sweep the
//! whole sweep is rolled back, logged and skipped until the next wake.

mod schedule;

pub use schedule::{Advance, ScheduleKind};

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::db::{
    NewScheduledTask, ScheduledTask, Store, StoreResult, SweepReport, TaskExecutionRecord,
};

/// Handle to the running sweep thread.
struct Worker {
    wake: Sender<()>,
    thread: JoinHandle<()>,
}

pub struct TaskScheduler {
    store: Store,
    interval: Duration,
    /// Agent names known at startup; only used to flag unknown names.
    known_agents: Vec<String>,
    worker: Mutex<Option<Worker>>,
}

impl TaskScheduler {
    pub fn new(store: Store, interval: Duration, known_agents: Vec<String>) -> Self {
        Self {
            store,
            interval,
            known_agents,
            worker: Mutex::new(None),
        }
    }

    /// Start the background sweep thread. Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        let mut worker = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if worker.is_some() {
            return false;
        }

        let (wake, wake_rx) = mpsc::channel::<()>();
        let store = self.store.clone();
        let interval = self.interval;
        let spawned = std::thread::Builder::new()
            .name("task-scheduler".to_string())
            .spawn(move || loop {
                if let Err(e) = sweep(&store, Utc::now()) {
                    tracing::error!("Error in task scheduler sweep: {}", e);
                }
                match wake_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    // A wake message or a dropped sender both mean stop.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        match spawned {
            Ok(thread) => {
                *worker = Some(Worker { wake, thread });
                tracing::info!(
                    interval_secs = self.interval.as_secs(),
                    "Task scheduler started"
                );
                true
            }
            Err(e) => {
                tracing::error!("Failed to spawn scheduler thread: {}", e);
                false
            }
        }
    }

    /// Stop the sweep thread and wait for it to exit.
    ///
    /// A sweep in progress finishes first. Returns `false` if the scheduler
    /// was not running.
    pub fn stop(&self) -> bool {
        let worker = {
            let mut guard = match self.worker.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };

        let Some(worker) = worker else {
            return false;
        };

        let _ = worker.wake.send(());
        if worker.thread.join().is_err() {
            tracing::error!("Scheduler thread panicked");
        }
        tracing::info!("Task scheduler stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        match self.worker.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Run one sweep at the current time. Store errors are logged and yield
    /// an empty report.
    pub fn run_sweep(&self) -> SweepReport {
        match self.sweep_at(Utc::now()) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Error in task scheduler sweep: {}", e);
                SweepReport::default()
            }
        }
    }

    /// Fire every task due at `now`, using `now` as the fire time.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> StoreResult<SweepReport> {
        sweep(&self.store, now)
    }

    /// Add a scheduled task. Returns the new task id, or `None` if the input
    /// is missing a required field or the store rejected it.
    ///
    /// The agent name is accepted even if it is not one of the known agents.
    pub fn add_task(&self, task: NewScheduledTask) -> Option<i64> {
        if task.agent_name.trim().is_empty() || task.task_name.trim().is_empty() {
            tracing::warn!("Rejected scheduled task with empty agent or task name");
            return None;
        }

        if !self.known_agents.iter().any(|name| name == &task.agent_name) {
            tracing::debug!(agent = %task.agent_name, "Scheduling task for unknown agent");
        }

        match self.store.insert_scheduled_task(&task) {
            Ok(id) => {
                tracing::info!(
                    "Added new scheduled task: {} for agent: {}",
                    task.task_name,
                    task.agent_name
                );
                Some(id)
            }
            Err(e) => {
                tracing::error!("Error adding task {}: {}", task.task_name, e);
                None
            }
        }
    }

    /// All scheduled tasks ordered by next run, optionally for one agent.
    pub fn tasks(&self, agent_name: Option<&str>) -> Vec<ScheduledTask> {
        self.store.scheduled_tasks(agent_name).unwrap_or_else(|e| {
            tracing::error!("Error getting scheduled tasks: {}", e);
            Vec::new()
        })
    }

    /// Newest execution records first.
    pub fn executions(&self, agent_name: Option<&str>, limit: usize) -> Vec<TaskExecutionRecord> {
        self.store.executions(agent_name, limit).unwrap_or_else(|e| {
            tracing::error!("Error getting execution records: {}", e);
            Vec::new()
        })
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sweep(store: &Store, now: DateTime<Utc>) -> StoreResult<SweepReport> {
    let report = store.fire_due_tasks(now)?;
    for fired in &report.fired {
        match fired.next_run {
            Some(next_run) => tracing::info!(
                agent = %fired.agent_name,
                task = %fired.task_name,
                next_run = %next_run,
                "Executed scheduled task"
            ),
            None => tracing::info!(
                agent = %fired.agent_name,
                task = %fired.task_name,
                "Executed one-shot task, now inactive"
            ),
        }
    }
    Ok(report)
}
