//! Definitions served from configuration

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::{
    DefinitionError, ExecutorDefinitions, SecretStore, TestDefinitions, WebhookStore,
};
use crate::models::{matches_selector, ExecutorDefinition, TestDefinition, WebhookDefinition};

/// Static definition set, usually loaded from the config file
#[derive(Clone, Debug, Default)]
pub struct StaticDefinitions {
    tests: Vec<TestDefinition>,
    executors: Vec<ExecutorDefinition>,
    webhooks: Vec<WebhookDefinition>,
    secrets: BTreeMap<String, BTreeMap<String, String>>,
}

impl StaticDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_test(mut self, test: TestDefinition) -> Self {
        self.tests.push(test);
        self
    }

    pub fn with_tests(mut self, tests: impl IntoIterator<Item = TestDefinition>) -> Self {
        self.tests.extend(tests);
        self
    }

    pub fn with_executor(mut self, executor: ExecutorDefinition) -> Self {
        self.executors.push(executor);
        self
    }

    pub fn with_executors(mut self, executors: impl IntoIterator<Item = ExecutorDefinition>) -> Self {
        self.executors.extend(executors);
        self
    }

    pub fn with_webhook(mut self, webhook: WebhookDefinition) -> Self {
        self.webhooks.push(webhook);
        self
    }

    pub fn with_webhooks(mut self, webhooks: impl IntoIterator<Item = WebhookDefinition>) -> Self {
        self.webhooks.extend(webhooks);
        self
    }

    pub fn with_secret(mut self, name: impl Into<String>, data: BTreeMap<String, String>) -> Self {
        self.secrets.insert(name.into(), data);
        self
    }

    pub fn executors(&self) -> &[ExecutorDefinition] {
        &self.executors
    }
}

#[async_trait]
impl TestDefinitions for StaticDefinitions {
    async fn get(&self, name: &str) -> Result<TestDefinition, DefinitionError> {
        self.tests
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| DefinitionError::not_found("test", name))
    }

    async fn list(&self, selector: &str) -> Result<Vec<TestDefinition>, DefinitionError> {
        Ok(self
            .tests
            .iter()
            .filter(|t| matches_selector(&t.labels, selector))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ExecutorDefinitions for StaticDefinitions {
    async fn get(&self, name: &str) -> Result<ExecutorDefinition, DefinitionError> {
        self.executors
            .iter()
            .find(|e| e.name == name)
            .cloned()
            .ok_or_else(|| DefinitionError::not_found("executor", name))
    }

    async fn list(&self, _selector: &str) -> Result<Vec<ExecutorDefinition>, DefinitionError> {
        Ok(self.executors.clone())
    }

    async fn get_by_type(&self, test_type: &str) -> Result<ExecutorDefinition, DefinitionError> {
        self.executors
            .iter()
            .find(|e| e.handles(test_type))
            .cloned()
            .ok_or_else(|| DefinitionError::not_found("executor for type", test_type))
    }
}

#[async_trait]
impl SecretStore for StaticDefinitions {
    async fn get(&self, name: &str) -> Result<BTreeMap<String, String>, DefinitionError> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| DefinitionError::not_found("secret", name))
    }
}

#[async_trait]
impl WebhookStore for StaticDefinitions {
    async fn list(&self, _selector: &str) -> Result<Vec<WebhookDefinition>, DefinitionError> {
        Ok(self.webhooks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;

    fn definitions() -> StaticDefinitions {
        StaticDefinitions::new()
            .with_test(TestDefinition::new("api-health", "curl/test").with_label("app", "api"))
            .with_test(TestDefinition::new("web-smoke", "postman/collection").with_label("app", "web"))
            .with_executor(ExecutorDefinition {
                name: "curl-executor".to_string(),
                types: vec!["curl/test".to_string()],
                ..Default::default()
            })
            .with_webhook(WebhookDefinition {
                name: "ci".to_string(),
                uri: "http://ci.local/hook".to_string(),
                events: vec![EventType::EndTest],
            })
            .with_secret(
                "api-health-secrets",
                BTreeMap::from([("TOKEN".to_string(), "s3cr3t".to_string())]),
            )
    }

    #[tokio::test]
    async fn test_tests_by_name_and_selector() {
        let defs = definitions();
        let test = TestDefinitions::get(&defs, "api-health").await.unwrap();
        assert_eq!(test.test_type, "curl/test");

        let err = TestDefinitions::get(&defs, "missing").await.unwrap_err();
        assert!(err.is_not_found());

        let web = TestDefinitions::list(&defs, "app=web").await.unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].name, "web-smoke");
        assert_eq!(TestDefinitions::list(&defs, "").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_executor_by_type() {
        let defs = definitions();
        let executor = defs.get_by_type("curl/test").await.unwrap();
        assert_eq!(executor.name, "curl-executor");
        assert!(defs.get_by_type("k6/script").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_secret_lookup() {
        let defs = definitions();
        let secret = SecretStore::get(&defs, "api-health-secrets").await.unwrap();
        assert_eq!(secret["TOKEN"], "s3cr3t");
        assert!(SecretStore::get(&defs, "web-smoke-secrets")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_webhooks_by_event() {
        let defs = definitions();
        assert_eq!(defs.list_by_event(EventType::EndTest).await.unwrap().len(), 1);
        assert!(defs.list_by_event(EventType::StartTest).await.unwrap().is_empty());
    }
}
