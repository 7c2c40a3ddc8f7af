//! Multi-step (suite) models
//!
//! A suite is an ordered list of steps; each step either runs a test or
//! waits. Step results only carry a nested execution for test steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::execution::{Execution, ExecutionResult, ExecutionStatus, ObjectRef};
use super::test::ExecutionRequest;
use crate::utils::id::{generate_execution_id, random_name};

/// Kind of suite step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    ExecuteTest,
    Delay,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::ExecuteTest => write!(f, "executeTest"),
            StepKind::Delay => write!(f, "delay"),
        }
    }
}

/// A single suite step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TestSuiteStep {
    #[serde(rename_all = "camelCase")]
    ExecuteTest {
        name: String,
        #[serde(default)]
        namespace: String,
        #[serde(default)]
        stop_on_failure: bool,
    },
    #[serde(rename_all = "camelCase")]
    Delay { duration_ms: u64 },
}

impl TestSuiteStep {
    pub fn kind(&self) -> StepKind {
        match self {
            TestSuiteStep::ExecuteTest { .. } => StepKind::ExecuteTest,
            TestSuiteStep::Delay { .. } => StepKind::Delay,
        }
    }

    pub fn name(&self) -> String {
        match self {
            TestSuiteStep::ExecuteTest { name, .. } => name.clone(),
            TestSuiteStep::Delay { duration_ms } => format!("{duration_ms}ms"),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}: {}", self.kind(), self.name())
    }

    pub fn stop_on_failure(&self) -> bool {
        match self {
            TestSuiteStep::ExecuteTest {
                stop_on_failure, ..
            } => *stop_on_failure,
            TestSuiteStep::Delay { .. } => false,
        }
    }
}

/// Outcome of one suite step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StepResult {
    #[serde(rename_all = "camelCase")]
    ExecuteTest {
        step: TestSuiteStep,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution: Option<Box<Execution>>,
    },
    #[serde(rename_all = "camelCase")]
    Delay {
        step: TestSuiteStep,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
    },
}

impl StepResult {
    /// Queued result for a step that has not run yet
    pub fn queued(step: TestSuiteStep) -> Self {
        let (name, namespace) = match &step {
            TestSuiteStep::ExecuteTest {
                name, namespace, ..
            } => (name.clone(), namespace.clone()),
            TestSuiteStep::Delay { .. } => {
                return StepResult::Delay {
                    step,
                    started_at: None,
                }
            }
        };

        let mut execution = Execution::new(
            namespace,
            name,
            String::new(),
            String::new(),
            BTreeMap::new(),
            BTreeMap::new(),
        );
        execution.execution_result = ExecutionResult::queued();
        StepResult::ExecuteTest {
            step,
            execution: Some(Box::new(execution)),
        }
    }

    pub fn step(&self) -> &TestSuiteStep {
        match self {
            StepResult::ExecuteTest { step, .. } | StepResult::Delay { step, .. } => step,
        }
    }

    pub fn kind(&self) -> StepKind {
        self.step().kind()
    }

    pub fn execution(&self) -> Option<&Execution> {
        match self {
            StepResult::ExecuteTest { execution, .. } => execution.as_deref(),
            StepResult::Delay { .. } => None,
        }
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        self.status_at(Utc::now())
    }

    /// Test steps report their nested execution's status; delays derive
    /// theirs from how long they have been waiting.
    pub fn status_at(&self, now: DateTime<Utc>) -> Option<ExecutionStatus> {
        match self {
            StepResult::ExecuteTest { execution, .. } => execution.as_ref().map(|e| e.status()),
            StepResult::Delay {
                step: TestSuiteStep::Delay { duration_ms },
                started_at,
            } => Some(match started_at {
                None => ExecutionStatus::Queued,
                Some(start) => {
                    let waited = (now - *start).to_std().unwrap_or(Duration::ZERO);
                    if waited >= Duration::from_millis(*duration_ms) {
                        ExecutionStatus::Success
                    } else {
                        ExecutionStatus::Running
                    }
                }
            }),
            StepResult::Delay { .. } => None,
        }
    }
}

/// Suite definition
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteDefinition {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub before: Vec<TestSuiteStep>,
    #[serde(default)]
    pub steps: Vec<TestSuiteStep>,
    #[serde(default)]
    pub after: Vec<TestSuiteStep>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

impl TestSuiteDefinition {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }

    pub fn all_steps(&self) -> impl Iterator<Item = &TestSuiteStep> {
        self.before.iter().chain(&self.steps).chain(&self.after)
    }
}

impl Execution {
    /// Started suite execution with one queued result per step
    pub fn new_suite(suite: &TestSuiteDefinition, request: &ExecutionRequest) -> Self {
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| format!("{}.{}", suite.name, random_name()));

        Execution {
            id: generate_execution_id(),
            name,
            test_name: suite.name.clone(),
            test_namespace: suite.namespace.clone(),
            test_type: String::new(),
            start_time: Some(Utc::now()),
            end_time: None,
            duration_ms: 0,
            params: request.params.clone(),
            labels: suite.labels.clone(),
            args: request.args.clone(),
            step_results: suite.all_steps().cloned().map(StepResult::queued).collect(),
            execution_result: ExecutionResult::pending(),
        }
    }

    /// Overall status derived from the step results
    pub fn aggregate_step_status(&self) -> ExecutionStatus {
        let statuses: Vec<ExecutionStatus> = self
            .step_results
            .iter()
            .filter_map(StepResult::status)
            .collect();

        if statuses.is_empty() {
            return self.status();
        }

        if statuses.contains(&ExecutionStatus::Error) {
            ExecutionStatus::Error
        } else if statuses.iter().all(|s| s.is_terminal()) {
            ExecutionStatus::Success
        } else if statuses
            .iter()
            .any(|s| matches!(s, ExecutionStatus::Running | ExecutionStatus::Success))
        {
            ExecutionStatus::Running
        } else {
            ExecutionStatus::Pending
        }
    }

    /// Rows of `Status, Step, ID, Error` for each step
    pub fn step_table(&self) -> (Vec<&'static str>, Vec<Vec<String>>) {
        let header = vec!["Status", "Step", "ID", "Error"];
        let mut rows = Vec::with_capacity(self.step_results.len());

        for result in &self.step_results {
            let status = result
                .status()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "no-execution-result".to_string());

            match result.kind() {
                StepKind::ExecuteTest => {
                    let (id, error) = result
                        .execution()
                        .map(|e| (e.id.clone(), e.execution_result.error_message.clone()))
                        .unwrap_or_default();
                    rows.push(vec![status, result.step().full_name(), id, error]);
                }
                StepKind::Delay => {
                    rows.push(vec![
                        status,
                        result.step().full_name(),
                        String::new(),
                        String::new(),
                    ]);
                }
            }
        }

        (header, rows)
    }
}
