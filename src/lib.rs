//! # Agent Panel
//!
//! A control panel for a small fleet of named worker agents.
//!
//! This library provides:
//! - Lifecycle control of the worker process shared by all agents
//! - A recurring task scheduler with a persistent execution log
//! - Host resource sampling and external service control
//! - Deployment of code artifacts to GitHub and Google Drive
//! - A JSON HTTP API over all of the above
//!
//! ## Scheduler Flow
//! 1. A task is created with a schedule kind and a first run time
//! 2. Every polling interval the scheduler sweeps for due tasks
//! 3. Each due task gets an execution record and its next run advanced
//! 4. `once` tasks are retired after firing
//!
//! ## Modules
//! - `agents`: worker process lifecycle and per-agent status
//! - `scheduler`: due-task sweep and schedule arithmetic
//! - `db`: SQLite persistence
//! - `monitor`: CPU, memory and service liveness
//! - `bridge`: GitHub / Google Drive uploads

pub mod agents;
pub mod api;
pub mod bridge;
pub mod config;
pub mod db;
pub mod monitor;
pub mod scheduler;

pub use config::Config;
pub use db::Store;
