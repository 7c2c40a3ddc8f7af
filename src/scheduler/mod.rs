//! Recurring scheduler
//!
//! Tests with a cron schedule are registered here instead of being run
//! immediately. A scheduled trigger calls back into the execution endpoint
//! with the immediate-run override set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// Resource URI of tests
pub const TEST_RESOURCE_URI: &str = "tests";

/// Resource URI of test suites
pub const TEST_SUITE_RESOURCE_URI: &str = "test-suites";

/// Scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("scheduled job {0} not found")]
    NotFound(String),

    #[error("invalid schedule {schedule:?}: {reason}")]
    InvalidSchedule { schedule: String, reason: String },

    #[error("scheduler backend error: {0}")]
    Backend(String),
}

/// What a recurring job triggers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobOptions {
    pub schedule: String,
    /// `tests` or `test-suites`
    pub resource: String,
    /// Serialized execution request posted on every trigger
    pub data: String,
    pub labels: BTreeMap<String, String>,
}

/// Stored recurring job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub name: String,
    pub metadata_name: String,
    pub options: CronJobOptions,
}

/// Object name of the recurring job for `name` under `resource`
pub fn metadata_name(name: &str, resource: &str) -> String {
    format!("{name}-{resource}")
}

/// Basic shape check of a five-field cron expression (or an `@` macro)
pub fn validate_schedule(schedule: &str) -> Result<(), SchedulerError> {
    let trimmed = schedule.trim();
    let invalid = |reason: &str| SchedulerError::InvalidSchedule {
        schedule: schedule.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("empty schedule"));
    }
    if trimmed.starts_with('@') {
        return match trimmed {
            "@yearly" | "@annually" | "@monthly" | "@weekly" | "@daily" | "@midnight"
            | "@hourly" => Ok(()),
            _ => Err(invalid("unknown macro")),
        };
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid("expected 5 fields"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/' | '?');
    if fields.iter().any(|f| !f.chars().all(allowed)) {
        return Err(invalid("unexpected character"));
    }
    Ok(())
}

/// Recurring scheduler contract
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Create or replace the recurring job
    async fn apply(
        &self,
        name: &str,
        metadata_name: &str,
        options: CronJobOptions,
    ) -> Result<(), SchedulerError>;

    async fn get(&self, metadata_name: &str) -> Result<ScheduledJob, SchedulerError>;

    async fn delete(&self, metadata_name: &str) -> Result<(), SchedulerError>;

    async fn update_labels(
        &self,
        metadata_name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), SchedulerError>;
}

/// Scheduler keeping jobs in memory. Nothing ever fires; used when no
/// cluster is configured and in tests.
#[derive(Default)]
pub struct MemoryScheduler {
    jobs: RwLock<HashMap<String, ScheduledJob>>,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.metadata_name.cmp(&b.metadata_name));
        jobs
    }
}

#[async_trait]
impl Scheduler for MemoryScheduler {
    async fn apply(
        &self,
        name: &str,
        metadata_name: &str,
        options: CronJobOptions,
    ) -> Result<(), SchedulerError> {
        validate_schedule(&options.schedule)?;
        info!(job = %metadata_name, schedule = %options.schedule, "Applied recurring job");
        self.jobs.write().await.insert(
            metadata_name.to_string(),
            ScheduledJob {
                name: name.to_string(),
                metadata_name: metadata_name.to_string(),
                options,
            },
        );
        Ok(())
    }

    async fn get(&self, metadata_name: &str) -> Result<ScheduledJob, SchedulerError> {
        self.jobs
            .read()
            .await
            .get(metadata_name)
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound(metadata_name.to_string()))
    }

    async fn delete(&self, metadata_name: &str) -> Result<(), SchedulerError> {
        self.jobs
            .write()
            .await
            .remove(metadata_name)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::NotFound(metadata_name.to_string()))
    }

    async fn update_labels(
        &self,
        metadata_name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(metadata_name)
            .ok_or_else(|| SchedulerError::NotFound(metadata_name.to_string()))?;
        job.options.labels = labels;
        Ok(())
    }
}
