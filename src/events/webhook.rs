//! HTTP webhook delivery

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{Event, EventSink, NotifyError};
use crate::models::WebhookDefinition;

/// Shared HTTP client for event delivery
#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
}

impl WebhookClient {
    /// Create a client with a per-request timeout
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("test-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    /// POST `body` as JSON, treating any non-2xx status as failure
    pub async fn post_json<T: Serialize + ?Sized>(&self, uri: &str, body: &T) -> Result<(), NotifyError> {
        debug!("Sending POST request to {}", uri);
        let response = self
            .client
            .post(uri)
            .json(body)
            .send()
            .await
            .map_err(|source| NotifyError::Http {
                uri: uri.to_string(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

/// One subscribed webhook endpoint
pub struct WebhookSink {
    client: WebhookClient,
    definition: WebhookDefinition,
}

impl WebhookSink {
    pub fn new(client: WebhookClient, definition: WebhookDefinition) -> Self {
        Self { client, definition }
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    fn name(&self) -> String {
        format!("webhook/{}", self.definition.name)
    }

    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        self.client.post_json(&self.definition.uri, event).await
    }
}
