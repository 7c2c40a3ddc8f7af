//! Execution storage
//!
//! The store is the single source of truth for execution state. Inserts are
//! atomic "insert if the name is unused for this test".

mod export;
mod file;
mod memory;

pub use export::{export_executions, ExportFormat};
pub use file::FileExecutionStore;
pub use memory::MemoryExecutionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Execution, ExecutionFilter, ExecutionResult, ExecutionsTotals, TransitionError,
};

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("execution {0} not found")]
    NotFound(String),

    #[error("test execution with name {name} already exists for test {test}")]
    Conflict { test: String, name: String },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Execution store contract
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a new execution; fails with `Conflict` if `(test, name)` exists
    async fn insert(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Execution, StoreError>;

    async fn get_by_name_and_test(&self, name: &str, test: &str) -> Result<Execution, StoreError>;

    /// Most recently started execution of a test
    async fn get_latest_by_test(&self, test: &str) -> Result<Execution, StoreError>;

    /// Most recently started execution of each listed test that has one
    async fn get_latest_by_tests(&self, tests: &[String]) -> Result<Vec<Execution>, StoreError>;

    /// Matching executions, newest first, paginated by the filter
    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError>;

    /// Record a result; terminal executions are never updated again
    async fn update_result(&self, id: &str, result: &ExecutionResult) -> Result<(), StoreError>;

    /// Persist the Running transition and its timestamp
    async fn start_execution(&self, id: &str, start_time: DateTime<Utc>) -> Result<(), StoreError>;

    /// Status counts of all executions matching the filter (no pagination)
    async fn totals(&self, filter: &ExecutionFilter) -> Result<ExecutionsTotals, StoreError>;
}

/// Latest started execution per test name
pub(crate) fn latest_per_test<'a>(
    executions: impl IntoIterator<Item = &'a Execution>,
    tests: &[String],
) -> Vec<Execution> {
    let mut latest: std::collections::BTreeMap<&str, &Execution> = Default::default();
    for execution in executions {
        if !tests.iter().any(|t| t == &execution.test_name) {
            continue;
        }
        let newer = latest
            .get(execution.test_name.as_str())
            .map(|current| execution.start_time > current.start_time)
            .unwrap_or(true);
        if newer {
            latest.insert(execution.test_name.as_str(), execution);
        }
    }
    latest.into_values().cloned().collect()
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every store implementation must share

    use super::*;
    use crate::models::ExecutionStatus;
    use chrono::Duration as ChronoDuration;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    pub fn execution(test: &str, name: &str) -> Execution {
        Execution::new(
            "testkube",
            test,
            name,
            "curl/test",
            BTreeMap::new(),
            BTreeMap::new(),
        )
    }

    pub async fn insert_get_and_conflict(store: &dyn ExecutionStore) {
        let first = execution("api", "run-1");
        store.insert(&first).await.unwrap();
        assert_eq!(store.get(&first.id).await.unwrap().name, "run-1");
        assert_eq!(
            store.get_by_name_and_test("run-1", "api").await.unwrap().id,
            first.id
        );

        let duplicate = execution("api", "run-1");
        assert!(matches!(
            store.insert(&duplicate).await,
            Err(StoreError::Conflict { .. })
        ));
        assert!(store.get(&duplicate.id).await.unwrap_err().is_not_found());

        // same name under another test is fine
        store.insert(&execution("web", "run-1")).await.unwrap();
    }

    pub async fn lifecycle_updates(store: &dyn ExecutionStore) {
        let e = execution("api", "run-2");
        store.insert(&e).await.unwrap();

        let started = Utc::now();
        store.start_execution(&e.id, started).await.unwrap();
        let stored = store.get(&e.id).await.unwrap();
        assert_eq!(stored.status(), ExecutionStatus::Running);
        assert_eq!(stored.start_time, Some(started));

        store
            .update_result(&e.id, &ExecutionResult::success("ok"))
            .await
            .unwrap();
        let stored = store.get(&e.id).await.unwrap();
        assert_eq!(stored.status(), ExecutionStatus::Success);
        assert!(stored.end_time.is_some());

        assert!(matches!(
            store
                .update_result(&e.id, &ExecutionResult::error("late"))
                .await,
            Err(StoreError::InvalidTransition(_))
        ));
        assert!(matches!(
            store.update_result("missing", &ExecutionResult::running()).await,
            Err(StoreError::NotFound(_))
        ));

        let unstarted = execution("api", "unstarted");
        store.insert(&unstarted).await.unwrap();
        assert!(matches!(
            store
                .update_result(&unstarted.id, &ExecutionResult::success("ok"))
                .await,
            Err(StoreError::InvalidTransition(_))
        ));
        assert_eq!(
            store.get(&unstarted.id).await.unwrap().status(),
            ExecutionStatus::Pending
        );
    }

    pub async fn listing_and_latest(store: &dyn ExecutionStore) {
        let now = Utc::now();
        for (i, test) in ["api", "api", "web"].iter().enumerate() {
            let e = execution(test, &format!("list-{i}"));
            store.insert(&e).await.unwrap();
            store
                .start_execution(&e.id, now + ChronoDuration::seconds(i as i64))
                .await
                .unwrap();
            if i == 0 {
                store
                    .update_result(&e.id, &ExecutionResult::error("x"))
                    .await
                    .unwrap();
            }
        }

        let latest = store.get_latest_by_test("api").await.unwrap();
        assert_eq!(latest.name, "list-1");
        assert!(store.get_latest_by_test("nope").await.unwrap_err().is_not_found());

        let latest = store
            .get_latest_by_tests(&["api".to_string(), "web".to_string()])
            .await
            .unwrap();
        assert_eq!(latest.len(), 2);

        let api = store
            .list(&ExecutionFilter::default().with_test_name("api"))
            .await
            .unwrap();
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].name, "list-1");

        let filter = ExecutionFilter::default().with_status(ExecutionStatus::Error);
        let totals = store.totals(&filter).await.unwrap();
        assert_eq!(totals.results, 1);
        assert_eq!(totals.failed, 1);
        let all = store.totals(&filter.without_status()).await.unwrap();
        assert_eq!(all.results, 3);
        assert_eq!(all.running, 2);
    }

    pub async fn concurrent_duplicate_inserts(store: Arc<dyn ExecutionStore>) {
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert(&execution("race", "same-name")).await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        let stored = store
            .list(&ExecutionFilter::default().with_test_name("race"))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }
}
