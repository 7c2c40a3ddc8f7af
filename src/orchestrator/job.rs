//! Per-test execution job

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Orchestrator;
use crate::definitions::secret_name;
use crate::events::Event;
use crate::executor::ExecutorError;
use crate::models::{ExecuteOptions, Execution, ExecutionResult, TestDefinition};
use crate::storage::StoreError;
use crate::utils::id::random_name;

fn duplicate_name(name: &str) -> String {
    format!("test execution with name {name} already exists")
}

impl Orchestrator {
    /// Run one test end to end. Failures become an Error execution, never
    /// an `Err`, so sibling jobs are unaffected.
    pub(crate) async fn execute_test(
        &self,
        token: CancellationToken,
        test: TestDefinition,
        mut options: ExecuteOptions,
    ) -> Execution {
        let name = options
            .request
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(random_name);

        match self.store.get_by_name_and_test(&name, &test.name).await {
            Ok(_) => return Execution::from_options(&name, &options).err(duplicate_name(&name)),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Execution::from_options(&name, &options)
                    .err(format!("can't check execution name: {e}"))
            }
        }

        let mut execution = Execution::from_options(&name, &options);
        if let Err(e) = self.store.insert(&execution).await {
            return match e {
                StoreError::Conflict { .. } => execution.err(duplicate_name(&name)),
                e => execution.err(format!(
                    "can't create new test execution, can't insert into storage: {e}"
                )),
            };
        }

        info!(execution = %execution.id, test = %test.name, name = %name, "Calling executor");
        if let Err(e) = execution.start() {
            return self.finish_with_error(execution, e.to_string()).await;
        }
        self.events.emit(Event::start_test(&execution));

        let start_time = execution.start_time.unwrap_or_else(chrono::Utc::now);
        if let Err(e) = self.store.start_execution(&execution.id, start_time).await {
            return self
                .finish_with_error(
                    execution,
                    format!("can't execute test, can't insert into storage error: {e}"),
                )
                .await;
        }

        match self.secrets.get(&secret_name(&test.name)).await {
            Ok(_) => options.has_secrets = true,
            Err(e) if e.is_not_found() => options.has_secrets = false,
            Err(e) => {
                return self
                    .finish_with_error(execution, format!("can't get secrets: {e}"))
                    .await
            }
        }

        let dispatched = self.dispatch(&token, &execution, &options).await;
        let result = match &dispatched {
            Ok(result) => result.clone(),
            Err(e) => ExecutionResult::error(format!("test execution failed: {e}")),
        };

        match self.store.update_result(&execution.id, &result).await {
            Ok(()) => {
                if let Err(e) = execution.apply_result(result) {
                    warn!(execution = %execution.id, "Local execution state diverged: {e}");
                }
            }
            Err(StoreError::InvalidTransition(_)) => {
                // the backend already stored a terminal result
                match self.store.get(&execution.id).await {
                    Ok(stored) => execution = stored,
                    Err(e) => execution = execution.err(format!("update execution error: {e}")),
                }
            }
            Err(e) => execution = execution.err(format!("update execution error: {e}")),
        }

        self.metrics.inc_execute(&execution);

        match &dispatched {
            Ok(_) => info!(
                execution = %execution.id,
                status = %execution.status(),
                "Test executed"
            ),
            Err(e) => error!(execution = %execution.id, "Test execution failed: {e}"),
        }
        self.events.emit(Event::end_test(&execution));
        execution
    }

    /// Run the executor for the test type, honouring cancellation
    async fn dispatch(
        &self,
        token: &CancellationToken,
        execution: &Execution,
        options: &ExecuteOptions,
    ) -> Result<ExecutionResult, ExecutorError> {
        let executor = self.registry.get(&options.test_type)?;
        debug!(
            execution = %execution.id,
            executor = executor.name(),
            sync = options.sync,
            has_secrets = options.has_secrets,
            "Dispatching execution"
        );

        let run = async {
            if options.sync {
                executor.execute_sync(execution, options).await
            } else {
                executor.execute(execution, options).await
            }
        };

        tokio::select! {
            result = run => result,
            _ = token.cancelled() => {
                if let Err(e) = executor.abort(&execution.id).await {
                    warn!(execution = %execution.id, "Abort after cancellation failed: {e}");
                }
                Err(ExecutorError::Cancelled)
            }
        }
    }

    /// Persist an Error result where possible, emit the end event, and
    /// return the failed execution
    async fn finish_with_error(&self, execution: Execution, message: String) -> Execution {
        if let Err(e) = self
            .store
            .update_result(&execution.id, &ExecutionResult::error(message.clone()))
            .await
        {
            warn!(execution = %execution.id, "Can't store failed execution: {e}");
        }
        let execution = execution.err(message);
        error!(execution = %execution.id, "{}", execution.execution_result.error_message);
        self.events.emit(Event::end_test(&execution));
        execution
    }
}
