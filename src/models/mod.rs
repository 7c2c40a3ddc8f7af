//! Data models for test orchestration
//!
//! Executions, results, suite steps, definitions, and request types.

mod execution;
mod filter;
mod step;
mod test;
mod webhook;

pub use execution::{
    format_duration, parse_status_list, Execution, ExecutionResult, ExecutionStatus,
    ExecutionSummary, ExecutionsResult, ExecutionsTotals, ObjectRef, ParseStatusError,
    TransitionError,
};
pub use filter::{matches_selector, ExecutionFilter, DEFAULT_PAGE_SIZE};
pub use step::{StepKind, StepResult, TestSuiteDefinition, TestSuiteStep};
pub use test::{
    merge_params, ContentType, ExecuteOptions, ExecutionRequest, ExecutorDefinition, Repository,
    TestContent, TestDefinition,
};
pub use webhook::{EventType, WebhookDefinition};
