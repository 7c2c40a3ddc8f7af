//! Webhook subscriptions and lifecycle event kinds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle event kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    StartTest,
    EndTest,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::StartTest => "start-test",
            EventType::EndTest => "end-test",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start-test" => Ok(EventType::StartTest),
            "end-test" => Ok(EventType::EndTest),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// Webhook sink subscribed to a set of event kinds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookDefinition {
    pub name: String,
    pub uri: String,
    pub events: Vec<EventType>,
}

impl WebhookDefinition {
    pub fn subscribes_to(&self, event_type: EventType) -> bool {
        self.events.contains(&event_type)
    }
}
