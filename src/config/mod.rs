//! Configuration module
//!
//! Loads the orchestrator configuration from YAML or JSON files and applies
//! environment overrides.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::{expand_path, find_config, CONFIG_LOCATIONS};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::definitions::StaticDefinitions;
use crate::models::{ExecutorDefinition, TestDefinition, WebhookDefinition};
use crate::orchestrator::DEFAULT_CONCURRENCY;
use crate::utils::LogLevel;
use crate::workerpool::MAX_CONCURRENCY;

/// Where executions are stored
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    File,
}

/// Execution storage settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,
    /// Directory of the file store; the user data dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Where test, executor, webhook, and secret definitions come from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionsSource {
    /// Lists in this configuration file
    #[default]
    Static,
    /// Custom resources in the cluster
    Kubernetes,
}

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub namespace: String,

    /// Tests running at once when a request gives no concurrency
    pub concurrency: usize,

    pub storage: StorageConfig,

    /// Root of per-execution artifact directories
    pub artifacts_dir: Option<PathBuf>,

    pub definitions: DefinitionsSource,

    /// Base URL scheduled jobs call back into
    pub api_uri: String,

    pub slack_webhook_url: Option<String>,

    pub webhook_timeout_secs: u64,

    pub log_level: String,

    pub tests: Vec<TestDefinition>,
    pub executors: Vec<ExecutorDefinition>,
    pub webhooks: Vec<WebhookDefinition>,
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            namespace: "testkube".to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            storage: StorageConfig::default(),
            artifacts_dir: None,
            definitions: DefinitionsSource::Static,
            api_uri: "http://test-orchestrator-api:8088/v1".to_string(),
            slack_webhook_url: None,
            webhook_timeout_secs: 10,
            log_level: "info".to_string(),
            tests: Vec::new(),
            executors: Vec::new(),
            webhooks: Vec::new(),
            secrets: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Explicit path, else the first standard location, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path.map(Path::to_path_buf).or_else(find_config) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than zero");
        }
        if self.concurrency > MAX_CONCURRENCY {
            anyhow::bail!("concurrency must be at most {MAX_CONCURRENCY}");
        }
        if LogLevel::from_str(&self.log_level).is_none() {
            anyhow::bail!("Unknown log level: {}", self.log_level);
        }
        for executor in &self.executors {
            if executor.types.is_empty() {
                anyhow::bail!("Executor '{}' handles no test types", executor.name);
            }
        }
        for test in &self.tests {
            if test.name.is_empty() {
                anyhow::bail!("Test definitions need a name");
            }
        }
        Ok(())
    }

    /// Environment values win over file values
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(namespace) = &env.namespace {
            self.namespace = namespace.clone();
        }
        if let Some(concurrency) = env.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(level) = &env.log_level {
            self.log_level = level.clone();
        }
        if let Some(url) = &env.slack_webhook_url {
            self.slack_webhook_url = Some(url.clone());
        }
        if let Some(path) = &env.storage_path {
            self.storage.kind = StorageKind::File;
            self.storage.path = Some(path.clone());
        }
        if let Some(uri) = &env.api_uri {
            self.api_uri = uri.clone();
        }
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_str(&self.log_level).unwrap_or(LogLevel::Info)
    }

    /// Definitions listed in this file
    pub fn static_definitions(&self) -> StaticDefinitions {
        self.secrets.iter().fold(
            StaticDefinitions::new()
                .with_tests(self.tests.clone())
                .with_executors(self.executors.clone())
                .with_webhooks(self.webhooks.clone()),
            |definitions, (name, data)| definitions.with_secret(name.clone(), data.clone()),
        )
    }

    /// Sample configuration written by `config init`
    pub fn example() -> Self {
        Self {
            storage: StorageConfig {
                kind: StorageKind::File,
                path: None,
            },
            tests: vec![
                TestDefinition::new("api-health", "curl/test")
                    .with_label("app", "api")
                    .with_param("URL", "http://api.example.com/health"),
                TestDefinition::new("api-nightly", "curl/test")
                    .with_label("app", "api")
                    .with_schedule("0 3 * * *"),
            ],
            executors: vec![ExecutorDefinition {
                name: "curl-executor".to_string(),
                types: vec!["curl/test".to_string()],
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "curl -fsS \"$URL\"".to_string(),
                ],
                ..Default::default()
            }],
            ..Self::default()
        }
    }
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
