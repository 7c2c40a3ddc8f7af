//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;
use std::path::PathBuf;

/// Environment variable prefix
const ENV_PREFIX: &str = "TEST_ORCHESTRATOR";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Config file from TEST_ORCHESTRATOR_CONFIG
    pub config_file: Option<PathBuf>,
    /// Namespace from TEST_ORCHESTRATOR_NAMESPACE
    pub namespace: Option<String>,
    /// Concurrency from TEST_ORCHESTRATOR_CONCURRENCY
    pub concurrency: Option<usize>,
    /// Log level from TEST_ORCHESTRATOR_LOG_LEVEL
    pub log_level: Option<String>,
    /// Slack incoming webhook from TEST_ORCHESTRATOR_SLACK_WEBHOOK_URL
    pub slack_webhook_url: Option<String>,
    /// File store directory from TEST_ORCHESTRATOR_STORAGE_PATH
    pub storage_path: Option<PathBuf>,
    /// Callback base URL from TEST_ORCHESTRATOR_API_URI
    pub api_uri: Option<String>,
    /// Kubeconfig from KUBECONFIG
    pub kubeconfig: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            config_file: get_env("CONFIG").map(PathBuf::from),
            namespace: get_env("NAMESPACE"),
            concurrency: get_env_parse("CONCURRENCY"),
            log_level: get_env("LOG_LEVEL"),
            slack_webhook_url: get_env("SLACK_WEBHOOK_URL"),
            storage_path: get_env("STORAGE_PATH").map(PathBuf::from),
            api_uri: get_env("API_URI"),
            kubeconfig: env::var("KUBECONFIG").ok(),
        }
    }

    /// Check if any prefixed variables are set
    pub fn has_any(&self) -> bool {
        self.config_file.is_some()
            || self.namespace.is_some()
            || self.concurrency.is_some()
            || self.log_level.is_some()
            || self.slack_webhook_url.is_some()
            || self.storage_path.is_some()
            || self.api_uri.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {ENV_PREFIX}_CONFIG:            {:?}", self.config_file);
        println!("  {ENV_PREFIX}_NAMESPACE:         {:?}", self.namespace);
        println!("  {ENV_PREFIX}_CONCURRENCY:       {:?}", self.concurrency);
        println!("  {ENV_PREFIX}_LOG_LEVEL:         {:?}", self.log_level);
        println!(
            "  {ENV_PREFIX}_SLACK_WEBHOOK_URL: {}",
            if self.slack_webhook_url.is_some() { "<set>" } else { "None" }
        );
        println!("  {ENV_PREFIX}_STORAGE_PATH:      {:?}", self.storage_path);
        println!("  {ENV_PREFIX}_API_URI:           {:?}", self.api_uri);
        println!("  KUBECONFIG:                       {:?}", self.kubeconfig);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Print all TEST_ORCHESTRATOR environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_CONFIG             Path to configuration file");
    println!("  {ENV_PREFIX}_NAMESPACE          Namespace of tests and executions");
    println!("  {ENV_PREFIX}_CONCURRENCY        Tests running at once per batch");
    println!("  {ENV_PREFIX}_LOG_LEVEL          trace, debug, info, warn, error");
    println!("  {ENV_PREFIX}_SLACK_WEBHOOK_URL  Slack incoming webhook for lifecycle events");
    println!("  {ENV_PREFIX}_STORAGE_PATH       Directory of the file execution store");
    println!("  {ENV_PREFIX}_API_URI            Base URL scheduled jobs call back into");
    println!("  KUBECONFIG                        Path to kubeconfig file");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_CONCURRENCY=4");
    println!("  test-orchestrator run --selector app=api");
}
