//! JSON HTTP API for the control panel.
//!
//! Command/query surface only: a dashboard polls these endpoints and issues
//! lifecycle, scheduling and deployment commands through them.

mod agents;
mod artifacts;
mod routes;
mod schedules;
mod system;

pub use routes::{app, serve, AppState};
