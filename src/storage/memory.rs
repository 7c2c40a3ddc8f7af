//! In-memory execution store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{latest_per_test, ExecutionStore, StoreError};
use crate::models::{Execution, ExecutionFilter, ExecutionResult, ExecutionsTotals};

/// Store backed by a map guarded by a single lock
#[derive(Default)]
pub struct MemoryExecutionStore {
    executions: RwLock<HashMap<String, Execution>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn insert(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        let taken = executions
            .values()
            .any(|e| e.test_name == execution.test_name && e.name == execution.name);
        if taken {
            return Err(StoreError::Conflict {
                test: execution.test_name.clone(),
                name: execution.name.clone(),
            });
        }
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Execution, StoreError> {
        let mut execution = self
            .executions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        execution.refresh_duration();
        Ok(execution)
    }

    async fn get_by_name_and_test(&self, name: &str, test: &str) -> Result<Execution, StoreError> {
        self.executions
            .read()
            .await
            .values()
            .find(|e| e.name == name && e.test_name == test)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{test}/{name}")))
    }

    async fn get_latest_by_test(&self, test: &str) -> Result<Execution, StoreError> {
        let executions = self.executions.read().await;
        latest_per_test(executions.values(), &[test.to_string()])
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(test.to_string()))
    }

    async fn get_latest_by_tests(&self, tests: &[String]) -> Result<Vec<Execution>, StoreError> {
        let executions = self.executions.read().await;
        Ok(latest_per_test(executions.values(), tests))
    }

    async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<Execution>, StoreError> {
        let matched: Vec<Execution> = self
            .executions
            .read()
            .await
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Ok(filter.paginate(matched))
    }

    async fn update_result(&self, id: &str, result: &ExecutionResult) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        execution.apply_result(result.clone())?;
        Ok(())
    }

    async fn start_execution(&self, id: &str, start_time: DateTime<Utc>) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        execution.start_at(start_time)?;
        Ok(())
    }

    async fn totals(&self, filter: &ExecutionFilter) -> Result<ExecutionsTotals, StoreError> {
        let executions = self.executions.read().await;
        Ok(ExecutionsTotals::from_executions(
            executions.values().filter(|e| filter.matches(e)),
        ))
    }
}
