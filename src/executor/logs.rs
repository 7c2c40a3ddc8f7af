//! Log lines streamed from runner backends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::ExecutionResult;

/// Live, append-only sequence of log lines. Ends when the producer closes it.
pub type LogStream = mpsc::Receiver<LogLine>;

/// Kind of log line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Line,
    Error,
    Event,
    Result,
}

/// One log line
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    pub time: DateTime<Utc>,
}

impl LogLine {
    fn new(kind: LogKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            result: None,
            time: Utc::now(),
        }
    }

    pub fn line(content: impl Into<String>) -> Self {
        Self::new(LogKind::Line, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(LogKind::Error, content)
    }

    pub fn event(content: impl Into<String>) -> Self {
        Self::new(LogKind::Event, content)
    }

    pub fn result(result: ExecutionResult) -> Self {
        Self {
            kind: LogKind::Result,
            content: result.status.to_string(),
            result: Some(result),
            time: Utc::now(),
        }
    }
}
