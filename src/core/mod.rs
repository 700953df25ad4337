// src/core/mod.rs

/// Cancel/pause signals shared between a job's controller entry and its run.
pub mod control;

pub mod error;

/// The per-process registry of active job runs.
pub mod jobs;

/// Job records, scan parameters and finding payloads.
pub mod models;

pub mod progress;

/// The fan-out harness and the three scan drivers built on it.
pub mod scanner;

/// The persistence boundary and its in-memory implementation.
pub mod store;

/// User agent sent by every outbound HTTP request unless configured otherwise.
pub const DEFAULT_USER_AGENT: &str = "ReconX/0.1";
