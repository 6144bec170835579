//! Host resource sampling and external service control.
//!
//! Every sampler fails closed: a reading that cannot be taken is reported as
//! `0.0` or `false` rather than an error.

use std::ffi::OsStr;
use std::process::Command;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};

use crate::db::{Store, SystemSnapshot};

const DEFAULT_CPU_WINDOW: Duration = Duration::from_secs(1);
const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(2);

/// Result of a service restart. Each step is reported separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestartOutcome {
    pub stop_ok: bool,
    pub start_ok: bool,
}

impl RestartOutcome {
    pub fn succeeded(&self) -> bool {
        self.stop_ok && self.start_ok
    }
}

pub struct SystemMonitor {
    marker: String,
    service_command: String,
    cpu_window: Duration,
    restart_delay: Duration,
    retention: Option<usize>,
}

impl SystemMonitor {
    pub fn new(marker: impl Into<String>, service_command: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            service_command: service_command.into(),
            cpu_window: DEFAULT_CPU_WINDOW,
            restart_delay: DEFAULT_RESTART_DELAY,
            retention: None,
        }
    }

    pub fn with_cpu_window(mut self, window: Duration) -> Self {
        self.cpu_window = window;
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Keep only the newest `keep` snapshots after each persisted sample.
    pub fn with_retention(mut self, keep: Option<usize>) -> Self {
        self.retention = keep;
        self
    }

    /// True if any host process name contains the service marker.
    pub fn sample_liveness(&self) -> bool {
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );
        let running = system.processes().values().any(|process| {
            let name: &OsStr = process.name().as_ref();
            matches_marker(&name.to_string_lossy(), &self.marker)
        });
        tracing::debug!(marker = %self.marker, running, "Sampled service liveness");
        running
    }

    /// Average CPU usage across cores over the sample window. Blocks for the window.
    pub fn sample_cpu(&self) -> f64 {
        let mut system = System::new();
        system.refresh_cpu_usage();
        std::thread::sleep(self.cpu_window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL));
        system.refresh_cpu_usage();

        let cpus = system.cpus();
        if cpus.is_empty() {
            return 0.0;
        }
        let total: f64 = cpus.iter().map(|cpu| cpu.cpu_usage() as f64).sum();
        round2(total / cpus.len() as f64)
    }

    /// Used memory as a percentage of total memory.
    pub fn sample_memory(&self) -> f64 {
        let mut system = System::new();
        system.refresh_memory();
        memory_percent(system.used_memory(), system.total_memory())
    }

    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            timestamp: Utc::now(),
            cpu_usage: self.sample_cpu(),
            memory_usage: self.sample_memory(),
            service_running: self.sample_liveness(),
        }
    }

    /// Take a snapshot and append it to the store.
    pub fn persist_snapshot(&self, store: &Store) -> Option<SystemSnapshot> {
        let snapshot = self.snapshot();
        self.persist(store, snapshot)
    }

    fn persist(&self, store: &Store, snapshot: SystemSnapshot) -> Option<SystemSnapshot> {
        if let Err(e) = store.insert_snapshot(&snapshot) {
            tracing::error!("Error saving system snapshot: {}", e);
            return None;
        }
        if let Some(keep) = self.retention {
            match store.prune_snapshots(keep) {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Pruned old system snapshots"),
                Err(e) => tracing::warn!("Error pruning system snapshots: {}", e),
            }
        }
        Some(snapshot)
    }

    /// Stop the service, wait, then start it again. A failed stop does not
    /// prevent the start.
    pub fn restart_service(&self) -> RestartOutcome {
        tracing::info!(service = %self.service_command, "Restarting service");
        let stop_ok = self.run_service("stop");
        std::thread::sleep(self.restart_delay);
        let start_ok = self.run_service("start");
        RestartOutcome { stop_ok, start_ok }
    }

    fn run_service(&self, action: &str) -> bool {
        match Command::new(&self.service_command).arg(action).status() {
            Ok(status) if status.success() => true,
            Ok(status) => {
                tracing::error!("{} {} exited with {}", self.service_command, action, status);
                false
            }
            Err(e) => {
                tracing::error!("Error running {} {}: {}", self.service_command, action, e);
                false
            }
        }
    }
}

fn matches_marker(process_name: &str, marker: &str) -> bool {
    !marker.is_empty() && process_name.to_lowercase().contains(&marker.to_lowercase())
}

fn memory_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(used as f64 / total as f64 * 100.0)
}

fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}
