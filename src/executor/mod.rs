//! Executor dispatch
//!
//! Every backend implements [`Executor`]; the [`ExecutorRegistry`] picks one
//! by test type at call time.

mod logs;
mod process;
mod registry;

pub use logs::{LogKind, LogLine, LogStream};
pub use process::ProcessExecutor;
pub use registry::ExecutorRegistry;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ExecuteOptions, Execution, ExecutionResult};

/// Executor errors
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("unsupported test type: {0}")]
    UnsupportedType(String),

    #[error("execution {0} not found")]
    NotFound(String),

    #[error("execution {0} is not running")]
    NotRunning(String),

    #[error("invalid executor definition: {0}")]
    InvalidDefinition(String),

    #[error("can't start test process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("execution cancelled")]
    Cancelled,

    #[error("backend error: {0}")]
    Backend(String),
}

/// Capability set every runner backend provides
#[async_trait]
pub trait Executor: Send + Sync {
    /// Backend name used in logs
    fn name(&self) -> &str;

    /// Start the run and return once it is observably running
    async fn execute(
        &self,
        execution: &Execution,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ExecutorError>;

    /// Run to completion and return the terminal result
    async fn execute_sync(
        &self,
        execution: &Execution,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ExecutorError>;

    /// Ask the backend to stop an in-flight run
    async fn abort(&self, id: &str) -> Result<(), ExecutorError>;

    /// Live log lines of a running or finished run
    async fn logs(&self, id: &str) -> Result<LogStream, ExecutorError>;
}
