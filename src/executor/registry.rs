//! Test type → executor mapping, filled at startup

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::{Executor, ExecutorError};
use crate::models::ExecutorDefinition;

/// Maps test type tags to executor implementations
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for one test type, replacing any previous one
    pub fn register(&mut self, test_type: impl Into<String>, executor: Arc<dyn Executor>) {
        let test_type = test_type.into();
        debug!(test_type = %test_type, executor = executor.name(), "registering executor");
        self.executors.insert(test_type, executor);
    }

    /// Register `executor` for every type the definition handles
    pub fn register_definition(&mut self, definition: &ExecutorDefinition, executor: Arc<dyn Executor>) {
        for test_type in &definition.types {
            self.register(test_type.clone(), executor.clone());
        }
    }

    pub fn with(mut self, test_type: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.register(test_type, executor);
        self
    }

    /// Executor for a test type, or `UnsupportedType`
    pub fn get(&self, test_type: &str) -> Result<Arc<dyn Executor>, ExecutorError> {
        self.executors
            .get(test_type)
            .cloned()
            .ok_or_else(|| ExecutorError::UnsupportedType(test_type.to_string()))
    }

    pub fn supports(&self, test_type: &str) -> bool {
        self.executors.contains_key(test_type)
    }

    pub fn types(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
