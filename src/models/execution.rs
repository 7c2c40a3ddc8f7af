//! Execution models
//!
//! Defines executions, their results, and the status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use super::step::StepResult;
use super::test::{ExecuteOptions, TestDefinition};
use crate::utils::id::generate_execution_id;

/// Execution lifecycle status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    #[default]
    Pending,
    Running,
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "…",
            ExecutionStatus::Pending => "○",
            ExecutionStatus::Running => "▶",
            ExecutionStatus::Success => "✓",
            ExecutionStatus::Error => "✗",
        }
    }

    /// Success and Error are the only terminal states
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Error)
    }

    /// Whether a backend result may move an execution from `self` to `to`.
    /// Error is reachable from any live state; Success and further Running
    /// updates only from Running; nothing moves backwards.
    pub fn can_become(&self, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (*self, to) {
            (from, _) if from.is_terminal() => false,
            (_, Error) => true,
            (Running, Success | Running) => true,
            (from, to) => !to.is_terminal() && to != Running && to >= from,
        }
    }

    pub fn all() -> [ExecutionStatus; 5] {
        [
            ExecutionStatus::Queued,
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Error,
        ]
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown execution status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for ExecutionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(ExecutionStatus::Queued),
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "success" | "passed" => Ok(ExecutionStatus::Success),
            "error" | "failed" => Ok(ExecutionStatus::Error),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Parse a separated list of statuses, e.g. `"success,error"`
pub fn parse_status_list(s: &str, sep: &str) -> Result<Vec<ExecutionStatus>, ParseStatusError> {
    s.split(sep)
        .filter(|part| !part.trim().is_empty())
        .map(ExecutionStatus::from_str)
        .collect()
}

/// Illegal state machine move
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("execution {id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub id: String,
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

/// Status and diagnostics of an execution
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

impl ExecutionResult {
    pub fn new(status: ExecutionStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn queued() -> Self {
        Self::new(ExecutionStatus::Queued)
    }

    pub fn pending() -> Self {
        Self::new(ExecutionStatus::Pending)
    }

    pub fn running() -> Self {
        Self::new(ExecutionStatus::Running)
    }

    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            error_message: String::new(),
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            error_message: message.into(),
            output: String::new(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_failed(&self) -> bool {
        self.status == ExecutionStatus::Error || !self.error_message.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }
}

/// Reference to a named, namespaced object
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

/// One attempt to run a test
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub name: String,
    pub test_name: String,
    #[serde(default)]
    pub test_namespace: String,
    #[serde(default)]
    pub test_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds, always recomputed from the timestamps
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_results: Vec<StepResult>,
    pub execution_result: ExecutionResult,
}

impl Execution {
    /// Create a pending execution with a fresh id
    pub fn new(
        test_namespace: impl Into<String>,
        test_name: impl Into<String>,
        name: impl Into<String>,
        test_type: impl Into<String>,
        params: BTreeMap<String, String>,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: generate_execution_id(),
            name: name.into(),
            test_name: test_name.into(),
            test_namespace: test_namespace.into(),
            test_type: test_type.into(),
            start_time: None,
            end_time: None,
            duration_ms: 0,
            params,
            labels,
            args: Vec::new(),
            step_results: Vec::new(),
            execution_result: ExecutionResult::pending(),
        }
    }

    /// Build the initial pending execution for a resolved run
    pub fn from_options(name: impl Into<String>, options: &ExecuteOptions) -> Self {
        let mut execution = Self::new(
            options.namespace.clone(),
            options.test_name.clone(),
            name,
            options.test_type.clone(),
            options.params.clone(),
            options.labels.clone(),
        );
        execution.args = options.args.clone();
        execution
    }

    /// Placeholder reported for a test deferred to its recurring schedule.
    /// It is never persisted, so it carries no id.
    pub fn queued(test: &TestDefinition, namespace: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            test_name: test.name.clone(),
            test_namespace: namespace.into(),
            test_type: test.test_type.clone(),
            start_time: None,
            end_time: None,
            duration_ms: 0,
            params: BTreeMap::new(),
            labels: test.labels.clone(),
            args: Vec::new(),
            step_results: Vec::new(),
            execution_result: ExecutionResult::queued(),
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.execution_result.status
    }

    pub fn is_completed(&self) -> bool {
        self.execution_result.is_completed()
    }

    pub fn is_failed(&self) -> bool {
        self.execution_result.is_failed()
    }

    /// Pending (or Queued) → Running, stamping the start time
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.start_at(Utc::now())
    }

    pub fn start_at(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        match self.status() {
            ExecutionStatus::Pending | ExecutionStatus::Queued => {
                self.start_time = Some(at);
                self.execution_result.status = ExecutionStatus::Running;
                self.refresh_duration();
                Ok(())
            }
            from => Err(self.transition_error(from, ExecutionStatus::Running)),
        }
    }

    /// Record a backend result. Terminal executions never move again and
    /// only [`Self::start`] enters Running.
    pub fn apply_result(&mut self, result: ExecutionResult) -> Result<(), TransitionError> {
        let from = self.status();
        if !from.can_become(result.status) {
            return Err(self.transition_error(from, result.status));
        }

        if result.is_completed() {
            let now = Utc::now();
            if self.start_time.is_none() {
                self.start_time = Some(now);
            }
            self.end_time = Some(now);
        }
        self.execution_result = result;
        self.refresh_duration();
        Ok(())
    }

    /// Mark the execution failed with the given message
    pub fn err(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        if self.is_completed() {
            if !self.execution_result.error_message.is_empty() {
                self.execution_result.error_message.push_str("; ");
            }
            self.execution_result.error_message.push_str(&message);
            return self;
        }

        self.execution_result.status = ExecutionStatus::Error;
        self.execution_result.error_message = message;
        self.end_time = Some(Utc::now());
        self.refresh_duration();
        self
    }

    /// Elapsed run time as of `now`
    pub fn calculate_duration_at(&self, now: DateTime<Utc>) -> Duration {
        let Some(start) = self.start_time else {
            return Duration::ZERO;
        };
        let end = self.end_time.unwrap_or(now);
        (end - start).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn calculate_duration(&self) -> Duration {
        self.calculate_duration_at(Utc::now())
    }

    pub fn refresh_duration(&mut self) {
        self.duration_ms = self.calculate_duration().as_millis() as u64;
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            name: self.test_name.clone(),
            namespace: self.test_namespace.clone(),
        }
    }

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            test_name: self.test_name.clone(),
            test_type: self.test_type.clone(),
            status: self.status(),
            start_time: self.start_time,
            end_time: self.end_time,
            duration: format_duration(self.calculate_duration()),
            labels: self.labels.clone(),
        }
    }

    fn transition_error(&self, from: ExecutionStatus, to: ExecutionStatus) -> TransitionError {
        TransitionError {
            id: self.id.clone(),
            from,
            to,
        }
    }
}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} ({}) [{}]",
            self.status().symbol(),
            self.test_name,
            self.name,
            self.id,
            format_duration(self.calculate_duration())
        )?;
        if !self.execution_result.error_message.is_empty() {
            write!(f, " - {}", self.execution_result.error_message)?;
        }
        Ok(())
    }
}

/// Condensed execution view used by listings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub id: String,
    pub name: String,
    pub test_name: String,
    pub test_type: String,
    pub status: ExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: String,
    pub labels: BTreeMap<String, String>,
}

/// Counts of executions by status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionsTotals {
    pub results: usize,
    pub passed: usize,
    pub failed: usize,
    pub queued: usize,
    pub pending: usize,
    pub running: usize,
}

impl ExecutionsTotals {
    pub fn from_executions<'a>(executions: impl IntoIterator<Item = &'a Execution>) -> Self {
        let mut totals = Self::default();
        for execution in executions {
            totals.add(execution.status());
        }
        totals
    }

    pub fn add(&mut self, status: ExecutionStatus) {
        self.results += 1;
        match status {
            ExecutionStatus::Success => self.passed += 1,
            ExecutionStatus::Error => self.failed += 1,
            ExecutionStatus::Queued => self.queued += 1,
            ExecutionStatus::Pending => self.pending += 1,
            ExecutionStatus::Running => self.running += 1,
        }
    }
}

/// Execution listing with overall and filtered totals
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionsResult {
    pub totals: ExecutionsTotals,
    pub filtered: ExecutionsTotals,
    pub results: Vec<ExecutionSummary>,
}

/// Human readable duration, e.g. `350ms`, `12.4s`, `3m07s`, `1h02m`
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", d.as_secs_f64())
    } else if ms < 3_600_000 {
        let secs = d.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        let mins = d.as_secs() / 60;
        format!("{}h{:02}m", mins / 60, mins % 60)
    }
}
