//! Slack incoming-webhook notifier

use async_trait::async_trait;
use serde_json::json;

use super::{Event, EventSink, NotifyError, WebhookClient};
use crate::models::{format_duration, EventType};

/// Posts `{"text": ...}` messages to a Slack incoming webhook
pub struct SlackSink {
    client: WebhookClient,
    webhook_url: String,
}

impl SlackSink {
    pub fn new(client: WebhookClient, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }

    /// Sink for the configured URL, if any
    pub fn from_url(client: WebhookClient, webhook_url: Option<&str>) -> Option<Self> {
        webhook_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| Self::new(client, url))
    }
}

/// Chat message text for an event
pub fn message(event: &Event) -> String {
    let execution = &event.execution;
    match event.event_type {
        EventType::StartTest => format!(
            "Test *{}* started execution `{}` ({})",
            execution.test_name, execution.name, execution.test_type
        ),
        EventType::EndTest => {
            let mut text = format!(
                "{} Test *{}* execution `{}` finished with status *{}* in {}",
                execution.status().symbol(),
                execution.test_name,
                execution.name,
                execution.status(),
                format_duration(execution.calculate_duration())
            );
            if !execution.execution_result.error_message.is_empty() {
                text.push_str(&format!(": {}", execution.execution_result.error_message));
            }
            text
        }
    }
}

#[async_trait]
impl EventSink for SlackSink {
    fn name(&self) -> String {
        "slack".to_string()
    }

    async fn notify(&self, event: &Event) -> Result<(), NotifyError> {
        let body = json!({ "text": message(event) });
        self.client.post_json(&self.webhook_url, &body).await
    }
}
