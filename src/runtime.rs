//! Runtime glue: configuration, persisted state, telemetry and the polling
//! runner that ties them to the orchestrator.

pub mod config;
pub mod runner;
pub mod state;
pub mod telemetry;
