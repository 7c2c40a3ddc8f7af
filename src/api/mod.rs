//! Boundary operations consumed by an HTTP routing layer
//!
//! [`ApiService`] is framework-free: it validates query input, calls the
//! orchestrator and collaborators, and reports failures as [`ApiError`]
//! values carrying their HTTP status.

mod error;
mod sse;

pub use error::{ApiError, Problem};
pub use sse::{sse_event, LogEvents};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifacts::{Artifact, ArtifactReader, ArtifactStore};
use crate::executor::{ExecutorError, LogLine};
use crate::metrics::MetricsSnapshot;
use crate::models::{
    parse_status_list, Execution, ExecutionFilter, ExecutionRequest, ExecutionStatus,
    ExecutionsResult, TestDefinition,
};
use crate::orchestrator::{BatchOutcome, BatchRequest, ExecutionTarget, Orchestrator};
use crate::workerpool::MAX_CONCURRENCY;

/// Query string of a batch execution request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteQuery {
    /// Raw `concurrency` value; parsed and validated by the service
    pub concurrency: Option<String>,
    /// Scheduler callback, runs scheduled tests immediately
    #[serde(default)]
    pub callback: bool,
}

/// Query string of the test listing
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestsQuery {
    #[serde(default)]
    pub selector: String,
    pub text_search: Option<String>,
    #[serde(rename = "type")]
    pub test_type: Option<String>,
    /// Comma separated statuses of the latest execution
    pub status: Option<String>,
}

/// Test with its most recent execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestWithExecution {
    pub test: TestDefinition,
    pub latest_execution: Option<Execution>,
}

/// Service behind the execution endpoints
#[derive(Clone)]
pub struct ApiService {
    orchestrator: Orchestrator,
    artifacts: Arc<dyn ArtifactStore>,
    shutdown: CancellationToken,
}

impl ApiService {
    pub fn new(orchestrator: Orchestrator, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            orchestrator,
            artifacts,
            shutdown: CancellationToken::new(),
        }
    }

    /// Batches started after this token is cancelled stop dispatching
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Trigger a batch by test name or by label selector
    pub async fn execute(
        &self,
        target: ExecutionTarget,
        request: ExecutionRequest,
        query: &ExecuteQuery,
    ) -> Result<BatchOutcome, ApiError> {
        let concurrency = parse_concurrency(query.concurrency.as_deref())?;
        let mut batch = BatchRequest {
            target,
            request,
            concurrency,
            run_now: query.callback,
        };
        if batch.run_now {
            info!(target = ?batch.target, "Scheduler callback, running now");
        }
        // a name only makes sense for one execution
        if matches!(batch.target, ExecutionTarget::Selector(_)) && batch.request.name.is_some() {
            warn!("Ignoring execution name for selector batch");
            batch.request.name = None;
        }

        Ok(self
            .orchestrator
            .execute_tests(batch, self.shutdown.child_token())
            .await?)
    }

    /// Executions matching the filter with overall and filtered totals
    pub async fn list_executions(&self, filter: &ExecutionFilter) -> Result<ExecutionsResult, ApiError> {
        let store = self.orchestrator.store();
        let totals = store.totals(&filter.without_status()).await?;
        let filtered = store.totals(filter).await?;
        let results = store
            .list(filter)
            .await?
            .iter()
            .map(Execution::summary)
            .collect();

        Ok(ExecutionsResult {
            totals,
            filtered,
            results,
        })
    }

    pub async fn get_execution(&self, id: &str) -> Result<Execution, ApiError> {
        Ok(self.orchestrator.store().get(id).await?)
    }

    /// Execution of a test by its execution name
    pub async fn get_test_execution(&self, test: &str, name: &str) -> Result<Execution, ApiError> {
        let mut execution = self
            .orchestrator
            .store()
            .get_by_name_and_test(name, test)
            .await?;
        execution.refresh_duration();
        Ok(execution)
    }

    /// Server-sent events carrying the execution's log lines
    pub async fn stream_logs(&self, id: &str) -> Result<LogEvents, ApiError> {
        let execution = self.get_execution(id).await?;
        let executor = self.orchestrator.registry().get(&execution.test_type)?;
        let lines = match executor.logs(id).await {
            Ok(lines) => lines,
            // the executor forgets finished runs; the stored result remains
            Err(ExecutorError::NotFound(_)) if execution.is_completed() => {
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.try_send(LogLine::result(execution.execution_result.clone()));
                rx
            }
            Err(e) => return Err(e.into()),
        };
        Ok(LogEvents::new(lines))
    }

    pub async fn abort_execution(&self, id: &str) -> Result<(), ApiError> {
        let execution = self.get_execution(id).await?;
        if execution.is_completed() {
            return Err(ApiError::Validation(format!(
                "execution {id} already finished with status {}",
                execution.status()
            )));
        }
        let executor = self.orchestrator.registry().get(&execution.test_type)?;
        executor.abort(id).await?;
        info!(execution = %id, "Execution aborted");
        Ok(())
    }

    pub async fn list_artifacts(&self, execution_id: &str) -> Result<Vec<Artifact>, ApiError> {
        Ok(self.artifacts.list_files(execution_id).await?)
    }

    pub async fn download_artifact(
        &self,
        execution_id: &str,
        name: &str,
    ) -> Result<ArtifactReader, ApiError> {
        Ok(self.artifacts.download_file(execution_id, name).await?)
    }

    pub async fn get_test_with_execution(&self, name: &str) -> Result<TestWithExecution, ApiError> {
        let test = self.orchestrator.tests().get(name).await?;
        let latest_execution = match self.orchestrator.store().get_latest_by_test(name).await {
            Ok(execution) => Some(execution),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        Ok(TestWithExecution {
            test,
            latest_execution,
        })
    }

    /// Tests with their latest execution, most recently run first
    pub async fn list_tests_with_executions(
        &self,
        query: &TestsQuery,
    ) -> Result<Vec<TestWithExecution>, ApiError> {
        let statuses: HashSet<ExecutionStatus> = match &query.status {
            Some(s) => parse_status_list(s, ",")
                .map_err(|e| ApiError::Validation(e.to_string()))?
                .into_iter()
                .collect(),
            None => HashSet::new(),
        };

        let tests: Vec<TestDefinition> = self
            .orchestrator
            .tests()
            .list(&query.selector)
            .await?
            .into_iter()
            .filter(|t| {
                query
                    .text_search
                    .as_deref()
                    .map_or(true, |text| t.name.contains(text))
            })
            .filter(|t| query.test_type.as_deref().map_or(true, |ty| t.test_type == ty))
            .collect();

        let names: Vec<String> = tests.iter().map(|t| t.name.clone()).collect();
        let mut latest = self.orchestrator.store().get_latest_by_tests(&names).await?;

        let mut results: Vec<TestWithExecution> = tests
            .into_iter()
            .map(|test| {
                let position = latest.iter().position(|e| e.test_name == test.name);
                TestWithExecution {
                    latest_execution: position.map(|i| latest.swap_remove(i)),
                    test,
                }
            })
            .filter(|t| {
                statuses.is_empty()
                    || t
                        .latest_execution
                        .as_ref()
                        .is_some_and(|e| statuses.contains(&e.status()))
            })
            .collect();

        results.sort_by(|a, b| {
            let started = |t: &TestWithExecution| t.latest_execution.as_ref().and_then(|e| e.start_time);
            started(b).cmp(&started(a))
        });
        Ok(results)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.orchestrator.metrics().snapshot()
    }
}

/// Parse the `concurrency` query value; absent means the configured default
pub fn parse_concurrency(value: Option<&str>) -> Result<Option<usize>, ApiError> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    match value.parse::<usize>() {
        Ok(0) => Err(ApiError::Validation(
            "can't detect concurrency level: must be greater than zero".to_string(),
        )),
        Ok(n) if n > MAX_CONCURRENCY => Err(ApiError::Validation(format!(
            "can't detect concurrency level: must be at most {MAX_CONCURRENCY}"
        ))),
        Ok(n) => Ok(Some(n)),
        Err(e) => Err(ApiError::Validation(format!(
            "can't detect concurrency level: {e}"
        ))),
    }
}
