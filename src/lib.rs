// src/lib.rs

//! Scan execution engine for reconnaissance jobs: subdomain resolution,
//! TCP port probing and web path discovery, run as cancellable, pausable
//! background jobs with persisted progress and findings.

pub mod app;
pub mod config;
pub mod core;
pub mod logging;
