//! Definition stores
//!
//! Tests, executors, secrets, and webhooks are owned by an external
//! definition store. [`StaticDefinitions`] serves them from configuration;
//! the Kubernetes-backed stores live in `crate::k8s`.

mod fixed;

pub use fixed::StaticDefinitions;

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::{EventType, ExecutorDefinition, TestDefinition, WebhookDefinition};

/// Definition store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("definition store error: {0}")]
    Backend(String),
}

impl DefinitionError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        DefinitionError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DefinitionError::NotFound { .. })
    }
}

/// Name of the secret holding a test's credentials
pub fn secret_name(test_name: &str) -> String {
    format!("{test_name}-secrets")
}

#[async_trait]
pub trait TestDefinitions: Send + Sync {
    async fn get(&self, name: &str) -> Result<TestDefinition, DefinitionError>;

    /// Tests whose labels match `selector`; an empty selector lists all
    async fn list(&self, selector: &str) -> Result<Vec<TestDefinition>, DefinitionError>;
}

#[async_trait]
pub trait ExecutorDefinitions: Send + Sync {
    async fn get(&self, name: &str) -> Result<ExecutorDefinition, DefinitionError>;

    async fn list(&self, selector: &str) -> Result<Vec<ExecutorDefinition>, DefinitionError>;

    /// Executor handling the given test type
    async fn get_by_type(&self, test_type: &str) -> Result<ExecutorDefinition, DefinitionError>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<BTreeMap<String, String>, DefinitionError>;
}

#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn list(&self, selector: &str) -> Result<Vec<WebhookDefinition>, DefinitionError>;

    /// Webhooks subscribed to one event kind
    async fn list_by_event(&self, event: EventType) -> Result<Vec<WebhookDefinition>, DefinitionError> {
        Ok(self
            .list("")
            .await?
            .into_iter()
            .filter(|w| w.subscribes_to(event))
            .collect())
    }
}
