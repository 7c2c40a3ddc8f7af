//! Lifecycle event notification
//!
//! Events are handed to a background task through an unbounded channel, so
//! a slow or failing sink can never hold up an execution. Each sink
//! delivery is independent: failures are logged and dropped.

mod slack;
mod webhook;

pub use slack::SlackSink;
pub use webhook::{WebhookClient, WebhookSink};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::definitions::{DefinitionError, WebhookStore};
use crate::models::{EventType, Execution};
use crate::utils::id::generate_execution_id;

/// Notification errors
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("request to {uri} failed: {source}")]
    Http {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{uri} responded with status {status}")]
    Status { uri: String, status: u16 },

    #[error("webhook lookup failed: {0}")]
    Lookup(#[from] DefinitionError),
}

/// Lifecycle event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub time: DateTime<Utc>,
    pub execution: Execution,
}

impl Event {
    pub fn new(event_type: EventType, execution: Execution) -> Self {
        Self {
            id: generate_execution_id(),
            event_type,
            time: Utc::now(),
            execution,
        }
    }

    pub fn start_test(execution: &Execution) -> Self {
        Self::new(EventType::StartTest, execution.clone())
    }

    pub fn end_test(execution: &Execution) -> Self {
        Self::new(EventType::EndTest, execution.clone())
    }
}

/// Destination of lifecycle events
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> String;

    async fn notify(&self, event: &Event) -> Result<(), NotifyError>;
}

/// Outcome of fanning one event out
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans events out to subscribed webhooks and fixed sinks
pub struct Notifier {
    webhooks: Option<Arc<dyn WebhookStore>>,
    client: WebhookClient,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Notifier {
    pub fn new(client: WebhookClient) -> Self {
        Self {
            webhooks: None,
            client,
            sinks: Vec::new(),
        }
    }

    /// Look up webhook subscriptions from `store` for every event
    pub fn with_webhooks(mut self, store: Arc<dyn WebhookStore>) -> Self {
        self.webhooks = Some(store);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    async fn sinks_for(&self, event: &Event) -> Vec<Arc<dyn EventSink>> {
        let mut sinks = self.sinks.clone();
        let Some(store) = &self.webhooks else {
            return sinks;
        };

        match store.list_by_event(event.event_type).await {
            Ok(webhooks) => sinks.extend(webhooks.into_iter().map(|definition| {
                Arc::new(WebhookSink::new(self.client.clone(), definition)) as Arc<dyn EventSink>
            })),
            Err(e) => warn!(event = %event.event_type, "Failed to list webhooks: {e}"),
        }
        sinks
    }

    /// Deliver one event to every matching sink
    pub async fn dispatch(&self, event: &Event) -> DispatchReport {
        let sinks = self.sinks_for(event).await;
        let outcomes = join_all(sinks.iter().map(|sink| async move {
            let outcome = sink.notify(event).await;
            (sink.name(), outcome)
        }))
        .await;

        let mut report = DispatchReport::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    debug!(sink = %name, event = %event.event_type, "Delivered event");
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(
                        sink = %name,
                        event = %event.event_type,
                        execution = %event.execution.id,
                        "Event delivery failed: {e}"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Fire-and-forget handle used by execution jobs
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventEmitter {
    /// Start the delivery task; it ends once every emitter is dropped
    pub fn spawn(notifier: Notifier) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                notifier.dispatch(&event).await;
            }
            debug!("Event delivery task finished");
        });
        (Self { tx }, handle)
    }

    /// Emitter that drops every event
    pub fn disabled() -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Queue an event for delivery; never blocks
    pub fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            debug!("Event delivery task not running, event dropped");
        }
    }
}
