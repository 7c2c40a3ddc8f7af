use super::*;
use crate::definitions::testing::FailingSecrets;
use crate::events::testing::RecordingSink;
use crate::events::{Notifier, WebhookClient};
use crate::executor::testing::{Script, ScriptedExecutor};
use crate::models::{EventType, ExecutionFilter, ExecutionStatus, ExecutorDefinition};
use crate::storage::MemoryExecutionStore;
use std::collections::BTreeMap;
use std::time::Duration;

const CURL: &str = "curl/test";

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<MemoryExecutionStore>,
    executor: Arc<ScriptedExecutor>,
    scheduler: Arc<MemoryScheduler>,
    sink: Arc<RecordingSink>,
}

fn definitions(tests: Vec<TestDefinition>) -> StaticDefinitions {
    StaticDefinitions::new()
        .with_tests(tests)
        .with_executor(ExecutorDefinition {
            name: "curl-executor".to_string(),
            types: vec![CURL.to_string()],
            ..Default::default()
        })
        .with_secret(
            "with-secret-secrets",
            BTreeMap::from([("TOKEN".to_string(), "t".to_string())]),
        )
}

fn harness(tests: Vec<TestDefinition>, executor: ScriptedExecutor) -> Harness {
    let store = Arc::new(MemoryExecutionStore::new());
    let executor = Arc::new(executor);
    let scheduler = Arc::new(MemoryScheduler::new());
    let sink = Arc::new(RecordingSink::default());
    let definitions = Arc::new(definitions(tests));

    let (events, _handle) =
        EventEmitter::spawn(Notifier::new(WebhookClient::new(1).unwrap()).with_sink(sink.clone()));
    let registry = ExecutorRegistry::new().with(CURL, executor.clone());

    let orchestrator = Orchestrator::new(store.clone(), registry)
        .with_tests(definitions.clone())
        .with_executors(definitions.clone())
        .with_secrets(definitions)
        .with_scheduler(scheduler.clone())
        .with_events(events);

    Harness {
        orchestrator,
        store,
        executor,
        scheduler,
        sink,
    }
}

fn test(name: &str) -> TestDefinition {
    TestDefinition::new(name, CURL).with_label("suite", "smoke")
}

fn named(name: &str) -> ExecutionRequest {
    ExecutionRequest {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

async fn run(h: &Harness, batch: BatchRequest) -> Result<BatchOutcome, OrchestratorError> {
    h.orchestrator
        .execute_tests(batch, CancellationToken::new())
        .await
}

async fn wait_for_events(sink: &RecordingSink, count: usize) -> Vec<(EventType, String)> {
    for _ in 0..100 {
        let kinds = sink.kinds();
        if kinds.len() >= count {
            return kinds;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sink.kinds()
}

#[tokio::test]
async fn test_scheduled_test_is_queued_not_dispatched() {
    let h = harness(
        vec![
            test("api"),
            test("web"),
            test("nightly").with_schedule("0 3 * * *"),
        ],
        ScriptedExecutor::new(),
    );

    let executions = run(&h, BatchRequest::selector("suite=smoke"))
        .await
        .unwrap()
        .into_executions();
    assert_eq!(executions.len(), 3);

    let queued: Vec<&Execution> = executions
        .iter()
        .filter(|e| e.status() == ExecutionStatus::Queued)
        .collect();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].test_name, "nightly");
    assert!(queued[0].id.is_empty());

    assert_eq!(h.executor.call_count(), 2);
    let job = h.scheduler.get("nightly-tests").await.unwrap();
    assert_eq!(job.options.schedule, "0 3 * * *");
    assert_eq!(job.options.resource, "tests");
    assert_eq!(h.store.len().await, 2);
}

#[tokio::test]
async fn test_run_now_dispatches_scheduled_test() {
    let h = harness(
        vec![test("nightly").with_schedule("0 3 * * *")],
        ScriptedExecutor::new(),
    );

    let outcome = run(&h, BatchRequest::test("nightly").with_run_now(true))
        .await
        .unwrap();
    let BatchOutcome::Single(execution) = outcome else {
        panic!("expected a single execution");
    };
    assert_eq!(execution.status(), ExecutionStatus::Running);
    assert!(h.scheduler.jobs().await.is_empty());
}

#[tokio::test]
async fn test_single_target_failure_is_request_failure() {
    let h = harness(
        vec![test("api")],
        ScriptedExecutor::new().with("api", Script::DispatchError("runner offline".to_string())),
    );

    let err = run(&h, BatchRequest::test("api")).await.unwrap_err();
    let OrchestratorError::ExecutionFailed(execution) = err else {
        panic!("expected execution failure, got {err}");
    };
    assert_eq!(
        execution.execution_result.error_message,
        "test execution failed: backend error: runner offline"
    );

    let stored = h.store.get(&execution.id).await.unwrap();
    assert_eq!(stored.status(), ExecutionStatus::Error);
    assert!(stored.end_time.is_some());
}

#[tokio::test]
async fn test_batch_returns_partial_results() {
    let h = harness(
        vec![test("api"), test("web"), test("db")],
        ScriptedExecutor::new()
            .with("web", Script::FailResult("assertion failed".to_string()))
            .with("db", Script::DispatchError("boom".to_string())),
    );

    let executions = run(&h, BatchRequest::selector("").with_concurrency(2))
        .await
        .unwrap()
        .into_executions();
    assert_eq!(executions.len(), 3);
    let failed = executions.iter().filter(|e| e.is_failed()).count();
    assert_eq!(failed, 2);
}

#[tokio::test]
async fn test_sync_request_persists_terminal_result() {
    let h = harness(vec![test("api")], ScriptedExecutor::new());
    let request = ExecutionRequest {
        sync: true,
        params: BTreeMap::from([("host".to_string(), "prod".to_string())]),
        ..Default::default()
    };

    let outcome = run(&h, BatchRequest::test("api").with_request(request))
        .await
        .unwrap();
    let BatchOutcome::Single(execution) = outcome else {
        panic!("expected a single execution");
    };
    assert_eq!(execution.status(), ExecutionStatus::Success);
    assert_eq!(execution.params["host"], "prod");

    let stored = h.store.get(&execution.id).await.unwrap();
    assert_eq!(stored.status(), ExecutionStatus::Success);
    assert_eq!(stored.execution_result.output, "passed");
    let calls = h.executor.calls.lock().unwrap().clone();
    assert_eq!(calls, vec![("api".to_string(), true, false)]);
}

#[tokio::test]
async fn test_duplicate_name_is_error_without_second_record() {
    let h = harness(vec![test("api")], ScriptedExecutor::new());

    run(&h, BatchRequest::test("api").with_request(named("release-1")))
        .await
        .unwrap();
    let err = run(&h, BatchRequest::test("api").with_request(named("release-1")))
        .await
        .unwrap_err();

    let OrchestratorError::ExecutionFailed(execution) = err else {
        panic!("expected execution failure");
    };
    assert_eq!(
        execution.execution_result.error_message,
        "test execution with name release-1 already exists"
    );
    assert!(execution.start_time.is_none());
    assert_eq!(h.store.len().await, 1);
    assert_eq!(h.executor.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_names_accept_one() {
    let h = harness(vec![test("api")], ScriptedExecutor::new());

    let (first, second) = tokio::join!(
        run(&h, BatchRequest::test("api").with_request(named("same"))),
        run(&h, BatchRequest::test("api").with_request(named("same"))),
    );
    assert_eq!(
        [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
        1
    );

    let stored = h
        .store
        .list(&ExecutionFilter::default().with_test_name("api"))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(h.executor.call_count(), 1);
}

#[tokio::test]
async fn test_secret_presence_is_checked() {
    let h = harness(vec![test("with-secret"), test("plain")], ScriptedExecutor::new());
    run(&h, BatchRequest::selector("")).await.unwrap();

    let mut calls = h.executor.calls.lock().unwrap().clone();
    calls.sort();
    assert_eq!(
        calls,
        vec![
            ("plain".to_string(), false, false),
            ("with-secret".to_string(), false, true),
        ]
    );
}

#[tokio::test]
async fn test_secret_lookup_failure_fails_execution() {
    let h = harness(vec![test("api")], ScriptedExecutor::new());
    let orchestrator = h.orchestrator.clone().with_secrets(Arc::new(FailingSecrets));

    let err = orchestrator
        .execute_tests(BatchRequest::test("api"), CancellationToken::new())
        .await
        .unwrap_err();
    let OrchestratorError::ExecutionFailed(execution) = err else {
        panic!("expected execution failure");
    };
    assert!(execution
        .execution_result
        .error_message
        .starts_with("can't get secrets"));
    assert_eq!(h.executor.call_count(), 0);
    assert_eq!(
        h.store.get(&execution.id).await.unwrap().status(),
        ExecutionStatus::Error
    );
}

#[tokio::test]
async fn test_metric_counts_failed_dispatch() {
    let h = harness(
        vec![test("api")],
        ScriptedExecutor::new().with("api", Script::DispatchError("boom".to_string())),
    );
    let _ = run(&h, BatchRequest::test("api")).await;

    let snapshot = h.orchestrator.metrics().snapshot();
    assert_eq!(snapshot.total(), 1);
    assert_eq!(snapshot.count(CURL, "error"), 1);
}

#[tokio::test]
async fn test_start_and_end_events() {
    let h = harness(vec![test("api")], ScriptedExecutor::new());
    run(&h, BatchRequest::test("api")).await.unwrap();

    let events = wait_for_events(&h.sink, 2).await;
    assert_eq!(
        events,
        vec![
            (EventType::StartTest, "api".to_string()),
            (EventType::EndTest, "api".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_unknown_test_and_missing_executor() {
    let h = harness(
        vec![TestDefinition::new("k6-load", "k6/script")],
        ScriptedExecutor::new(),
    );

    assert!(matches!(
        run(&h, BatchRequest::test("missing")).await,
        Err(OrchestratorError::TestNotFound(_))
    ));

    let err = run(&h, BatchRequest::test("k6-load")).await.unwrap_err();
    let OrchestratorError::ExecutionFailed(execution) = err else {
        panic!("expected execution failure");
    };
    assert!(execution
        .execution_result
        .error_message
        .starts_with("can't create valid execution options"));
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_dispatch() {
    let h = harness(
        vec![test("api")],
        ScriptedExecutor::new().with("api", Script::Hang),
    );
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = h
        .orchestrator
        .execute_tests(BatchRequest::test("api"), token)
        .await
        .unwrap_err();
    let OrchestratorError::ExecutionFailed(execution) = err else {
        panic!("expected execution failure");
    };
    assert_eq!(
        execution.execution_result.error_message,
        "test execution failed: execution cancelled"
    );
    assert_eq!(*h.executor.aborted.lock().unwrap(), vec![execution.id.clone()]);
}

#[tokio::test]
async fn test_single_target_cancelled_before_start_fails() {
    let h = harness(vec![test("api")], ScriptedExecutor::new());
    let token = CancellationToken::new();
    token.cancel();

    let err = h
        .orchestrator
        .execute_tests(BatchRequest::test("api"), token)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::JobFailed(PoolError::Cancelled)));
    assert_eq!(
        err.to_string(),
        "test execution failed: job cancelled before it started"
    );
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_selector_cancelled_before_start_is_empty_batch() {
    let h = harness(vec![test("api"), test("web")], ScriptedExecutor::new());
    let token = CancellationToken::new();
    token.cancel();

    let executions = h
        .orchestrator
        .execute_tests(BatchRequest::selector(""), token)
        .await
        .unwrap()
        .into_executions();
    assert!(executions.is_empty());
}

#[tokio::test]
async fn test_zero_concurrency_rejected() {
    let h = harness(vec![test("api")], ScriptedExecutor::new());
    assert!(matches!(
        run(&h, BatchRequest::selector("").with_concurrency(0)).await,
        Err(OrchestratorError::Pool(PoolError::InvalidConcurrency))
    ));
    assert!(matches!(
        run(&h, BatchRequest::selector("").with_concurrency(usize::MAX)).await,
        Err(OrchestratorError::Pool(PoolError::ConcurrencyTooHigh))
    ));
}
