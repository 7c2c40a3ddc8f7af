//! Server-sent event framing for log streams

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::warn;

use crate::executor::{LogLine, LogStream};

/// One SSE event: `data: <json>` followed by a blank line
pub fn sse_event(line: &LogLine) -> Result<String, serde_json::Error> {
    Ok(format!("data: {}\n\n", serde_json::to_string(line)?))
}

/// Log lines framed as SSE events; ends when the executor closes the stream
pub struct LogEvents {
    lines: LogStream,
}

impl LogEvents {
    pub fn new(lines: LogStream) -> Self {
        Self { lines }
    }

    pub async fn next_event(&mut self) -> Option<String> {
        loop {
            let line = self.lines.recv().await?;
            if let Some(event) = frame(&line) {
                return Some(event);
            }
        }
    }
}

fn frame(line: &LogLine) -> Option<String> {
    match sse_event(line) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Can't encode log line: {e}");
            None
        }
    }
}

impl Stream for LogEvents {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        loop {
            match self.lines.poll_recv(cx) {
                Poll::Ready(Some(line)) => {
                    if let Some(event) = frame(&line) {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
