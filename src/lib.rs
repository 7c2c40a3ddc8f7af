//! Test Orchestrator
//!
//! Runs test workloads against pluggable executors, tracks every execution
//! through its lifecycle, fans batches out over a bounded worker pool, and
//! notifies webhook and chat sinks on start and end.
//!
//! The [`orchestrator::Orchestrator`] is the entry point for batches;
//! [`api::ApiService`] wraps it with the operations an HTTP layer exposes.

pub mod api;
pub mod artifacts;
pub mod cli;
pub mod config;
pub mod definitions;
pub mod events;
pub mod executor;
pub mod k8s;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod scheduler;
pub mod storage;
pub mod utils;
pub mod workerpool;
