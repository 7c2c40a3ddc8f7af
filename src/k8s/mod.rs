//! Kubernetes integration
//!
//! Provides cluster-backed definition stores, the secret lookup, and the
//! CronJob recurring scheduler.

mod client;
mod cronjob;
mod resources;

pub use client::{K8sClient, REQUIRED_CRDS};
pub use cronjob::{build_cron_job, callback_url, job_from_cron, KubeCronScheduler};
pub use resources::{
    ExecutorResource, ExecutorSpec, K8sDefinitions, TestContentSpec, TestResource, TestSpec,
    WebhookResource, WebhookSpec,
};
