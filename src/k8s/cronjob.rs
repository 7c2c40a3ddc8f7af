//! CronJob-backed recurring scheduler
//!
//! Each recurring job is a `batch/v1` CronJob whose pod posts the stored
//! execution request back to the API with the `callback` flag set.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

use super::client::is_not_found;
use super::K8sClient;
use crate::scheduler::{validate_schedule, CronJobOptions, ScheduledJob, Scheduler, SchedulerError};

const FIELD_MANAGER: &str = "test-orchestrator";
const NAME_ANNOTATION: &str = "test-orchestrator/name";
const RESOURCE_ANNOTATION: &str = "test-orchestrator/resource";
const TRIGGER_IMAGE: &str = "curlimages/curl:8.5.0";

/// Scheduler storing recurring jobs as CronJobs
pub struct KubeCronScheduler {
    client: K8sClient,
    /// Base URL of the API the CronJob calls back, e.g. `http://orchestrator:8088/v1`
    api_uri: String,
    image: String,
}

impl KubeCronScheduler {
    pub fn new(client: K8sClient, api_uri: impl Into<String>) -> Self {
        Self {
            client,
            api_uri: api_uri.into(),
            image: TRIGGER_IMAGE.to_string(),
        }
    }

    fn api(&self) -> Api<CronJob> {
        self.client.namespaced_api()
    }

    fn backend_error(metadata_name: &str, err: kube::Error) -> SchedulerError {
        if is_not_found(&err) {
            SchedulerError::NotFound(metadata_name.to_string())
        } else {
            SchedulerError::Backend(format!("cron job {metadata_name}: {err}"))
        }
    }
}

/// Callback URL the scheduled pod posts to
pub fn callback_url(api_uri: &str, resource: &str, name: &str) -> String {
    format!(
        "{}/{}/{}/executions?callback=true",
        api_uri.trim_end_matches('/'),
        resource,
        name
    )
}

/// Build the CronJob object for a recurring job
pub fn build_cron_job(
    name: &str,
    metadata_name: &str,
    namespace: &str,
    api_uri: &str,
    image: &str,
    options: &CronJobOptions,
) -> CronJob {
    let annotations = BTreeMap::from([
        (NAME_ANNOTATION.to_string(), name.to_string()),
        (RESOURCE_ANNOTATION.to_string(), options.resource.clone()),
    ]);
    let args = vec![
        "-sS".to_string(),
        "-X".to_string(),
        "POST".to_string(),
        "-H".to_string(),
        "Content-Type: application/json".to_string(),
        "-d".to_string(),
        options.data.clone(),
        callback_url(api_uri, &options.resource, name),
    ];

    CronJob {
        metadata: ObjectMeta {
            name: Some(metadata_name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(options.labels.clone()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: options.schedule.clone(),
            concurrency_policy: Some("Forbid".to_string()),
            job_template: JobTemplateSpec {
                metadata: None,
                spec: Some(JobSpec {
                    template: PodTemplateSpec {
                        metadata: None,
                        spec: Some(PodSpec {
                            restart_policy: Some("Never".to_string()),
                            containers: vec![Container {
                                name: "trigger".to_string(),
                                image: Some(image.to_string()),
                                args: Some(args),
                                ..Default::default()
                            }],
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Read a recurring job back from its CronJob
pub fn job_from_cron(cron_job: &CronJob) -> ScheduledJob {
    let metadata_name = cron_job.metadata.name.clone().unwrap_or_default();
    let annotations = cron_job.metadata.annotations.clone().unwrap_or_default();
    let spec = cron_job.spec.as_ref();

    let data = spec
        .and_then(|s| s.job_template.spec.as_ref())
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|s| s.containers.first())
        .and_then(|c| c.args.as_ref())
        .and_then(|args| {
            args.iter()
                .position(|a| a == "-d")
                .and_then(|i| args.get(i + 1))
                .cloned()
        })
        .unwrap_or_default();

    ScheduledJob {
        name: annotations
            .get(NAME_ANNOTATION)
            .cloned()
            .unwrap_or_else(|| metadata_name.clone()),
        metadata_name,
        options: CronJobOptions {
            schedule: spec.map(|s| s.schedule.clone()).unwrap_or_default(),
            resource: annotations.get(RESOURCE_ANNOTATION).cloned().unwrap_or_default(),
            data,
            labels: cron_job.metadata.labels.clone().unwrap_or_default(),
        },
    }
}

#[async_trait]
impl Scheduler for KubeCronScheduler {
    async fn apply(
        &self,
        name: &str,
        metadata_name: &str,
        options: CronJobOptions,
    ) -> Result<(), SchedulerError> {
        validate_schedule(&options.schedule)?;
        let cron_job = build_cron_job(
            name,
            metadata_name,
            self.client.namespace(),
            &self.api_uri,
            &self.image,
            &options,
        );

        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.api()
            .patch(metadata_name, &params, &Patch::Apply(&cron_job))
            .await
            .map_err(|e| Self::backend_error(metadata_name, e))?;

        info!(cron_job = %metadata_name, schedule = %options.schedule, "Applied cron job");
        Ok(())
    }

    async fn get(&self, metadata_name: &str) -> Result<ScheduledJob, SchedulerError> {
        self.api()
            .get(metadata_name)
            .await
            .map(|c| job_from_cron(&c))
            .map_err(|e| Self::backend_error(metadata_name, e))
    }

    async fn delete(&self, metadata_name: &str) -> Result<(), SchedulerError> {
        self.api()
            .delete(metadata_name, &DeleteParams::default())
            .await
            .map_err(|e| Self::backend_error(metadata_name, e))?;
        info!(cron_job = %metadata_name, "Deleted cron job");
        Ok(())
    }

    async fn update_labels(
        &self,
        metadata_name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), SchedulerError> {
        let patch = json!({ "metadata": { "labels": labels } });
        self.api()
            .patch(metadata_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Self::backend_error(metadata_name, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{metadata_name, TEST_RESOURCE_URI};

    fn options() -> CronJobOptions {
        CronJobOptions {
            schedule: "*/15 * * * *".to_string(),
            resource: TEST_RESOURCE_URI.to_string(),
            data: r#"{"name":"","params":{"host":"prod"}}"#.to_string(),
            labels: BTreeMap::from([("app".to_string(), "api".to_string())]),
        }
    }

    #[test]
    fn test_callback_url() {
        assert_eq!(
            callback_url("http://orchestrator:8088/v1/", "tests", "api-health"),
            "http://orchestrator:8088/v1/tests/api-health/executions?callback=true"
        );
    }

    #[test]
    fn test_build_cron_job() {
        let meta = metadata_name("api-health", TEST_RESOURCE_URI);
        let cron_job = build_cron_job(
            "api-health",
            &meta,
            "testkube",
            "http://orchestrator:8088/v1",
            TRIGGER_IMAGE,
            &options(),
        );

        assert_eq!(cron_job.metadata.name.as_deref(), Some("api-health-tests"));
        assert_eq!(cron_job.metadata.namespace.as_deref(), Some("testkube"));
        let spec = cron_job.spec.as_ref().unwrap();
        assert_eq!(spec.schedule, "*/15 * * * *");

        let pod = spec
            .job_template
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        let args = pod.containers[0].args.as_ref().unwrap();
        assert_eq!(
            args.last().unwrap(),
            "http://orchestrator:8088/v1/tests/api-health/executions?callback=true"
        );
    }

    #[test]
    fn test_job_round_trips_through_cron_job() {
        let cron_job = build_cron_job(
            "api-health",
            "api-health-tests",
            "testkube",
            "http://orchestrator:8088/v1",
            TRIGGER_IMAGE,
            &options(),
        );
        let job = job_from_cron(&cron_job);
        assert_eq!(job.name, "api-health");
        assert_eq!(job.metadata_name, "api-health-tests");
        assert_eq!(job.options, options());
    }
}
