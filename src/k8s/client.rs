//! Kubernetes client wrapper
//!
//! Provides a high-level interface to the Kubernetes API.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, ListParams},
    Client,
};
use tracing::{info, warn};

/// Custom resource definitions the Kubernetes-backed stores read
pub const REQUIRED_CRDS: [&str; 3] = [
    "tests.tests.testkube.io",
    "executors.executor.testkube.io",
    "webhooks.executor.testkube.io",
];

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
    namespace: String,
}

impl K8sClient {
    /// Create a new Kubernetes client
    pub async fn new(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;

        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    /// Get the namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Check that the test, executor, and webhook CRDs are installed
    pub async fn crds_installed(&self) -> Result<bool> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let crd_list = crds
            .list(&ListParams::default())
            .await
            .context("Failed to list CRDs")?;

        let found = crd_list
            .items
            .iter()
            .filter(|crd| {
                crd.metadata
                    .name
                    .as_deref()
                    .map(|n| REQUIRED_CRDS.contains(&n))
                    .unwrap_or(false)
            })
            .count();

        let installed = found == REQUIRED_CRDS.len();
        if installed {
            info!("Test CRDs are installed");
        } else {
            warn!("Test CRDs not fully installed ({}/{})", found, REQUIRED_CRDS.len());
        }
        Ok(installed)
    }

    /// Check if namespace exists
    pub async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());

        match namespaces.get(name).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(e).context("Failed to check namespace existence"),
        }
    }

    /// Create a namespaced API for a resource type in the client namespace
    pub fn namespaced_api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// Whether a kube error is an API 404
pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    #[test]
    fn test_not_found_detection() {
        let missing = kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "secrets \"api-secrets\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        });
        assert!(is_not_found(&missing));

        let forbidden = kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        });
        assert!(!is_not_found(&forbidden));
    }

    #[test]
    fn test_required_crds() {
        assert!(REQUIRED_CRDS.iter().all(|crd| crd.contains(".testkube.io")));
    }
}
