//! Test and executor definitions, execution requests, and resolved options

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where test content comes from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    #[default]
    String,
    FileUri,
    GitFile,
    GitDir,
}

/// Git repository holding test content
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub uri: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub token: String,
}

/// Test content
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestContent {
    #[serde(rename = "type", default)]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
}

impl TestContent {
    pub fn from_string(data: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::String,
            data: data.into(),
            ..Default::default()
        }
    }

    /// Content fetched as a directory (many files)
    pub fn is_dir(&self) -> bool {
        self.content_type == ContentType::GitDir
    }

    /// Content fetched as a single file
    pub fn is_file(&self) -> bool {
        matches!(
            self.content_type,
            ContentType::String | ContentType::FileUri | ContentType::GitFile
        )
    }
}

/// Test definition
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDefinition {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(rename = "type")]
    pub test_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<TestContent>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Cron expression; tests with a schedule are deferred to the scheduler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

impl TestDefinition {
    pub fn new(name: impl Into<String>, test_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            test_type: test_type.into(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    pub fn has_schedule(&self) -> bool {
        self.schedule
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Executor definition: which test types a backend handles and how
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorDefinition {
    pub name: String,
    pub types: Vec<String>,
    /// Command line run for each test (process executor)
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ExecutorDefinition {
    pub fn handles(&self, test_type: &str) -> bool {
        self.types.iter().any(|t| t == test_type)
    }
}

/// Caller supplied request template for one or more executions
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub sync: bool,
}

/// Fully resolved configuration of a single run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOptions {
    pub test_name: String,
    pub namespace: String,
    pub test_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<TestContent>,
    pub params: BTreeMap<String, String>,
    pub args: Vec<String>,
    pub executor_name: String,
    pub executor: ExecutorDefinition,
    pub sync: bool,
    pub labels: BTreeMap<String, String>,
    pub has_secrets: bool,
    pub request: ExecutionRequest,
}

impl ExecuteOptions {
    /// Merge a test definition, its executor, and the request
    pub fn resolve(
        test: &TestDefinition,
        executor: &ExecutorDefinition,
        request: &ExecutionRequest,
        namespace: &str,
    ) -> Self {
        let params = merge_params(&test.params, &request.params);
        let mut request = request.clone();
        request.params = params.clone();

        Self {
            test_name: test.name.clone(),
            namespace: namespace.to_string(),
            test_type: test.test_type.clone(),
            content: test.content.clone(),
            params,
            args: request.args.clone(),
            executor_name: executor.name.clone(),
            executor: executor.clone(),
            sync: request.sync,
            labels: test.labels.clone(),
            has_secrets: false,
            request,
        }
    }
}

/// Request params override test params on key collision. Neither input is
/// modified.
pub fn merge_params(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_params_request_wins() {
        let base = map(&[("host", "staging"), ("retries", "1")]);
        let overrides = map(&[("host", "prod"), ("verbose", "true")]);

        let merged = merge_params(&base, &overrides);
        assert_eq!(merged, map(&[("host", "prod"), ("retries", "1"), ("verbose", "true")]));
        assert_eq!(base.get("host").map(String::as_str), Some("staging"));
    }

    #[test]
    fn test_merge_params_empty() {
        assert!(merge_params(&BTreeMap::new(), &BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_resolve_options() {
        let test = TestDefinition::new("api-smoke", "postman/collection")
            .with_param("env", "dev")
            .with_label("team", "payments");
        let executor = ExecutorDefinition {
            name: "postman-executor".to_string(),
            types: vec!["postman/collection".to_string()],
            ..Default::default()
        };
        let request = ExecutionRequest {
            params: map(&[("env", "prod")]),
            sync: true,
            ..Default::default()
        };

        let options = ExecuteOptions::resolve(&test, &executor, &request, "testkube");
        assert_eq!(options.params.get("env").map(String::as_str), Some("prod"));
        assert_eq!(options.request.params, options.params);
        assert_eq!(options.executor_name, "postman-executor");
        assert_eq!(options.namespace, "testkube");
        assert!(options.sync);
        assert!(!options.has_secrets);
        assert_eq!(options.labels.get("team").map(String::as_str), Some("payments"));
    }

    #[test]
    fn test_has_schedule() {
        assert!(!TestDefinition::new("a", "t").has_schedule());
        assert!(!TestDefinition::new("a", "t").with_schedule("  ").has_schedule());
        assert!(TestDefinition::new("a", "t")
            .with_schedule("*/5 * * * *")
            .has_schedule());
    }

    #[test]
    fn test_content_kind() {
        assert!(TestContent::from_string("{}").is_file());
        let dir = TestContent {
            content_type: ContentType::GitDir,
            ..Default::default()
        };
        assert!(dir.is_dir());
        assert!(!dir.is_file());
    }

    #[test]
    fn test_definition_yaml() {
        let yaml = r#"
name: cart-api
type: curl/test
params:
  url: http://cart
schedule: "0 * * * *"
"#;
        let test: TestDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(test.test_type, "curl/test");
        assert!(test.has_schedule());
    }
}
