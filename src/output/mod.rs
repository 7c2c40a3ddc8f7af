//! Output formatting module
//!
//! Renders executions, listings, and metrics for the terminal.

mod formatter;

pub use formatter::{ExecutionFormatter, OutputFormat};
