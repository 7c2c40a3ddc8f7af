//! Test, executor, and webhook custom resources
//!
//! [`K8sDefinitions`] reads definitions from the cluster and looks up secrets.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::client::is_not_found;
use super::K8sClient;
use crate::definitions::{
    DefinitionError, ExecutorDefinitions, SecretStore, TestDefinitions, WebhookStore,
};
use crate::models::{
    ContentType, EventType, ExecutorDefinition, Repository, TestContent, TestDefinition,
    WebhookDefinition,
};

/// Test custom resource specification
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "tests.testkube.io",
    version = "v3",
    kind = "Test",
    root = "TestResource",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TestSpec {
    /// Test type, e.g. `postman/collection`
    #[serde(rename = "type")]
    pub test_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<TestContentSpec>,

    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Cron expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

/// Test content as stored on the resource
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TestContentSpec {
    /// string, file-uri, git-file, git-dir
    #[serde(rename = "type", default)]
    pub content_type: String,

    #[serde(default)]
    pub data: String,

    #[serde(default)]
    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositorySpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
pub struct RepositorySpec {
    pub uri: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub path: String,
}

/// Executor custom resource specification
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "executor.testkube.io",
    version = "v1",
    kind = "Executor",
    root = "ExecutorResource",
    namespaced
)]
pub struct ExecutorSpec {
    /// Test types handled by this executor
    pub types: Vec<String>,

    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Webhook custom resource specification
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, Default, JsonSchema)]
#[kube(
    group = "executor.testkube.io",
    version = "v1",
    kind = "Webhook",
    root = "WebhookResource",
    namespaced
)]
pub struct WebhookSpec {
    pub uri: String,

    /// Event kinds, e.g. `start-test`
    #[serde(default)]
    pub events: Vec<String>,
}

fn content_type(s: &str) -> ContentType {
    match s {
        "file-uri" => ContentType::FileUri,
        "git-file" => ContentType::GitFile,
        "git-dir" => ContentType::GitDir,
        _ => ContentType::String,
    }
}

impl From<&TestContentSpec> for TestContent {
    fn from(spec: &TestContentSpec) -> Self {
        TestContent {
            content_type: content_type(&spec.content_type),
            data: spec.data.clone(),
            uri: spec.uri.clone(),
            repository: spec.repository.as_ref().map(|r| Repository {
                uri: r.uri.clone(),
                branch: r.branch.clone(),
                path: r.path.clone(),
                ..Default::default()
            }),
        }
    }
}

impl From<&TestResource> for TestDefinition {
    fn from(resource: &TestResource) -> Self {
        TestDefinition {
            name: resource.name_any(),
            namespace: resource.namespace().unwrap_or_default(),
            test_type: resource.spec.test_type.clone(),
            content: resource.spec.content.as_ref().map(TestContent::from),
            params: resource.spec.params.clone(),
            labels: resource.labels().clone(),
            schedule: resource.spec.schedule.clone(),
        }
    }
}

impl From<&ExecutorResource> for ExecutorDefinition {
    fn from(resource: &ExecutorResource) -> Self {
        ExecutorDefinition {
            name: resource.name_any(),
            types: resource.spec.types.clone(),
            command: resource.spec.command.clone(),
            args: resource.spec.args.clone(),
            image: resource.spec.image.clone(),
        }
    }
}

impl From<&WebhookResource> for WebhookDefinition {
    fn from(resource: &WebhookResource) -> Self {
        let name = resource.name_any();
        let events = resource
            .spec
            .events
            .iter()
            .filter_map(|e| match e.parse::<EventType>() {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(webhook = %name, "Ignoring event: {err}");
                    None
                }
            })
            .collect();

        WebhookDefinition {
            name,
            uri: resource.spec.uri.clone(),
            events,
        }
    }
}

fn definition_error(kind: &'static str, name: &str, err: kube::Error) -> DefinitionError {
    if is_not_found(&err) {
        DefinitionError::not_found(kind, name)
    } else {
        DefinitionError::Backend(format!("{kind} {name}: {err}"))
    }
}

fn list_params(selector: &str) -> ListParams {
    if selector.trim().is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(selector)
    }
}

/// Definition stores backed by cluster resources
#[derive(Clone)]
pub struct K8sDefinitions {
    client: K8sClient,
}

impl K8sDefinitions {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }

    fn tests(&self) -> Api<TestResource> {
        self.client.namespaced_api()
    }

    fn executors(&self) -> Api<ExecutorResource> {
        self.client.namespaced_api()
    }

    fn webhooks(&self) -> Api<WebhookResource> {
        self.client.namespaced_api()
    }

    fn secrets(&self) -> Api<Secret> {
        self.client.namespaced_api()
    }
}

#[async_trait]
impl TestDefinitions for K8sDefinitions {
    async fn get(&self, name: &str) -> Result<TestDefinition, DefinitionError> {
        self.tests()
            .get(name)
            .await
            .map(|t| TestDefinition::from(&t))
            .map_err(|e| definition_error("test", name, e))
    }

    async fn list(&self, selector: &str) -> Result<Vec<TestDefinition>, DefinitionError> {
        let list = self
            .tests()
            .list(&list_params(selector))
            .await
            .map_err(|e| DefinitionError::Backend(format!("listing tests: {e}")))?;
        Ok(list.items.iter().map(TestDefinition::from).collect())
    }
}

#[async_trait]
impl ExecutorDefinitions for K8sDefinitions {
    async fn get(&self, name: &str) -> Result<ExecutorDefinition, DefinitionError> {
        self.executors()
            .get(name)
            .await
            .map(|e| ExecutorDefinition::from(&e))
            .map_err(|e| definition_error("executor", name, e))
    }

    async fn list(&self, selector: &str) -> Result<Vec<ExecutorDefinition>, DefinitionError> {
        let list = self
            .executors()
            .list(&list_params(selector))
            .await
            .map_err(|e| DefinitionError::Backend(format!("listing executors: {e}")))?;
        Ok(list.items.iter().map(ExecutorDefinition::from).collect())
    }

    async fn get_by_type(&self, test_type: &str) -> Result<ExecutorDefinition, DefinitionError> {
        ExecutorDefinitions::list(self, "")
            .await?
            .into_iter()
            .find(|e| e.handles(test_type))
            .ok_or_else(|| DefinitionError::not_found("executor for type", test_type))
    }
}

#[async_trait]
impl WebhookStore for K8sDefinitions {
    async fn list(&self, selector: &str) -> Result<Vec<WebhookDefinition>, DefinitionError> {
        let list = self
            .webhooks()
            .list(&list_params(selector))
            .await
            .map_err(|e| DefinitionError::Backend(format!("listing webhooks: {e}")))?;
        Ok(list.items.iter().map(WebhookDefinition::from).collect())
    }
}

#[async_trait]
impl SecretStore for K8sDefinitions {
    async fn get(&self, name: &str) -> Result<BTreeMap<String, String>, DefinitionError> {
        let secret = self
            .secrets()
            .get(name)
            .await
            .map_err(|e| definition_error("secret", name, e))?;
        debug!(secret = %name, "Found secret");

        let mut data: BTreeMap<String, String> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
            .collect();
        data.extend(secret.string_data.unwrap_or_default());
        Ok(data)
    }
}
