//! Batch execution handler
//!
//! Turns a batch of tests and one request template into executions:
//! scheduled tests are handed to the recurring scheduler and reported as
//! queued, everything else runs through the worker pool.

mod job;

use futures::FutureExt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::definitions::{
    DefinitionError, ExecutorDefinitions, SecretStore, StaticDefinitions, TestDefinitions,
};
use crate::events::EventEmitter;
use crate::executor::ExecutorRegistry;
use crate::metrics::ExecutionMetrics;
use crate::models::{ExecuteOptions, Execution, ExecutionRequest, TestDefinition};
use crate::scheduler::{metadata_name, CronJobOptions, MemoryScheduler, Scheduler, SchedulerError, TEST_RESOURCE_URI};
use crate::storage::ExecutionStore;
use crate::workerpool::{Job, PoolError, WorkFn, WorkerPool};

/// Default number of tests running at once
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Orchestrator errors
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("test {0} not found")]
    TestNotFound(String),

    #[error("can't get tests: {0}")]
    Definitions(#[from] DefinitionError),

    #[error("can't create scheduled test: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("can't prepare test request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The single targeted job produced no execution
    #[error("test execution failed: {0}")]
    JobFailed(PoolError),

    /// The single targeted execution failed
    #[error("{}", .0.execution_result.error_message)]
    ExecutionFailed(Box<Execution>),
}

/// Which tests a batch runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionTarget {
    /// One test by name; its failure is the request's failure
    Test(String),
    /// Every test whose labels match; an empty selector matches all
    Selector(String),
}

/// Incoming batch execution request
#[derive(Clone, Debug)]
pub struct BatchRequest {
    pub target: ExecutionTarget,
    pub request: ExecutionRequest,
    pub concurrency: Option<usize>,
    /// Run scheduled tests now instead of registering their schedule
    pub run_now: bool,
}

impl BatchRequest {
    pub fn test(name: impl Into<String>) -> Self {
        Self {
            target: ExecutionTarget::Test(name.into()),
            request: ExecutionRequest::default(),
            concurrency: None,
            run_now: false,
        }
    }

    pub fn selector(selector: impl Into<String>) -> Self {
        Self {
            target: ExecutionTarget::Selector(selector.into()),
            ..Self::test("")
        }
    }

    pub fn with_request(mut self, request: ExecutionRequest) -> Self {
        self.request = request;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_run_now(mut self, run_now: bool) -> Self {
        self.run_now = run_now;
        self
    }
}

/// Result of a batch
#[derive(Clone, Debug)]
pub enum BatchOutcome {
    Single(Execution),
    Batch(Vec<Execution>),
}

impl BatchOutcome {
    pub fn into_executions(self) -> Vec<Execution> {
        match self {
            BatchOutcome::Single(execution) => vec![execution],
            BatchOutcome::Batch(executions) => executions,
        }
    }
}

/// Execution orchestrator with its collaborators
#[derive(Clone)]
pub struct Orchestrator {
    namespace: String,
    concurrency: usize,
    store: Arc<dyn ExecutionStore>,
    registry: Arc<ExecutorRegistry>,
    tests: Arc<dyn TestDefinitions>,
    executors: Arc<dyn ExecutorDefinitions>,
    secrets: Arc<dyn SecretStore>,
    scheduler: Arc<dyn Scheduler>,
    events: EventEmitter,
    metrics: Arc<ExecutionMetrics>,
}

impl Orchestrator {
    /// Orchestrator with empty definitions, an in-memory scheduler, and no
    /// event delivery
    pub fn new(store: Arc<dyn ExecutionStore>, registry: ExecutorRegistry) -> Self {
        let definitions = Arc::new(StaticDefinitions::new());
        Self {
            namespace: "testkube".to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            store,
            registry: Arc::new(registry),
            tests: definitions.clone(),
            executors: definitions.clone(),
            secrets: definitions,
            scheduler: Arc::new(MemoryScheduler::new()),
            events: EventEmitter::disabled(),
            metrics: Arc::new(ExecutionMetrics::new()),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_tests(mut self, tests: Arc<dyn TestDefinitions>) -> Self {
        self.tests = tests;
        self
    }

    pub fn with_executors(mut self, executors: Arc<dyn ExecutorDefinitions>) -> Self {
        self.executors = executors;
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ExecutionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn tests(&self) -> &Arc<dyn TestDefinitions> {
        &self.tests
    }

    pub fn metrics(&self) -> &Arc<ExecutionMetrics> {
        &self.metrics
    }

    async fn resolve_tests(&self, target: &ExecutionTarget) -> Result<Vec<TestDefinition>, OrchestratorError> {
        match target {
            ExecutionTarget::Test(name) => match self.tests.get(name).await {
                Ok(test) => Ok(vec![test]),
                Err(e) if e.is_not_found() => Err(OrchestratorError::TestNotFound(name.clone())),
                Err(e) => Err(e.into()),
            },
            ExecutionTarget::Selector(selector) => Ok(self.tests.list(selector).await?),
        }
    }

    /// Register a scheduled test with the recurring scheduler
    async fn schedule(
        &self,
        test: &TestDefinition,
        request: &ExecutionRequest,
        namespace: &str,
    ) -> Result<Execution, OrchestratorError> {
        let data = serde_json::to_string(request)
            .map_err(|e| OrchestratorError::InvalidRequest(e.to_string()))?;
        let options = CronJobOptions {
            schedule: test.schedule.clone().unwrap_or_default(),
            resource: TEST_RESOURCE_URI.to_string(),
            data,
            labels: test.labels.clone(),
        };

        self.scheduler
            .apply(&test.name, &metadata_name(&test.name, TEST_RESOURCE_URI), options)
            .await?;
        info!(test = %test.name, "Test deferred to its schedule");
        Ok(Execution::queued(test, namespace))
    }

    /// Resolve options for one test before it is submitted
    async fn prepare(
        &self,
        test: &TestDefinition,
        request: &ExecutionRequest,
        namespace: &str,
    ) -> Result<ExecuteOptions, DefinitionError> {
        let executor = self.executors.get_by_type(&test.test_type).await?;
        Ok(ExecuteOptions::resolve(test, &executor, request, namespace))
    }

    fn work_fn(&self) -> WorkFn<TestDefinition, ExecuteOptions, Execution> {
        let orchestrator = self.clone();
        Arc::new(move |token, test, options| {
            let orchestrator = orchestrator.clone();
            async move { Ok(orchestrator.execute_test(token, test, options).await) }.boxed()
        })
    }

    /// Execute a batch of tests
    pub async fn execute_tests(
        &self,
        batch: BatchRequest,
        token: CancellationToken,
    ) -> Result<BatchOutcome, OrchestratorError> {
        let started = Instant::now();
        let namespace = if batch.request.namespace.is_empty() {
            self.namespace.clone()
        } else {
            batch.request.namespace.clone()
        };

        let tests = self.resolve_tests(&batch.target).await?;
        let mut results = Vec::with_capacity(tests.len());
        let mut jobs = Vec::new();
        let mut job_failure = None;
        let exec_fn = self.work_fn();

        for test in tests {
            if test.has_schedule() && !batch.run_now {
                results.push(self.schedule(&test, &batch.request, &namespace).await?);
                continue;
            }

            match self.prepare(&test, &batch.request, &namespace).await {
                Ok(options) => jobs.push(Job::new(test, options, exec_fn.clone())),
                Err(e) => {
                    warn!(test = %test.name, "Can't create execution options: {e}");
                    results.push(
                        Execution::queued(&test, namespace.as_str())
                            .err(format!("can't create valid execution options: {e}")),
                    );
                }
            }
        }

        if !jobs.is_empty() {
            let concurrency = batch.concurrency.unwrap_or(self.concurrency);
            let pool = Arc::new(WorkerPool::new(concurrency)?);
            let submitted = jobs.len();
            let mut responses = pool.execute(jobs, token)?;

            while let Some(response) = responses.recv().await {
                match response.into_result() {
                    Ok(execution) => results.push(execution),
                    Err(e) => {
                        error!("Test execution job failed: {e}");
                        job_failure = Some(e);
                    }
                }
            }
            info!(
                submitted,
                concurrency,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Batch finished"
            );
        }

        if matches!(batch.target, ExecutionTarget::Test(_)) {
            if results.is_empty() {
                if let Some(e) = job_failure {
                    return Err(OrchestratorError::JobFailed(e));
                }
            } else {
                let execution = results.swap_remove(0);
                if execution.is_failed() {
                    return Err(OrchestratorError::ExecutionFailed(Box::new(execution)));
                }
                return Ok(BatchOutcome::Single(execution));
            }
        }

        Ok(BatchOutcome::Batch(results))
    }
}

#[cfg(test)]
mod tests;
