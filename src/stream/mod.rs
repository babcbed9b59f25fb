//! Client-facing event stream
//!
//! Turns the generation loop's internal events into `StreamEvent` records
//! and writes them as newline-delimited JSON in the order they happened.

pub mod ndjson;

use crate::agent::AgentEvent;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Status line shown while the tool runs
pub const SEARCHING_PREFIX: &str = "🔍 Searching:";

/// Status line shown once the tool has returned
pub const FOUND_MESSAGE: &str = "✅ Found relevant documents.";

/// Reported when the loop stops without finishing or failing
pub const UNEXPECTED_END: &str = "Generation ended unexpectedly";

/// One record of the client protocol: `{"type": ..., "content": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum StreamEvent {
    Status(String),
    Token(String),
    ToolLog(String),
    Error(String),
}

impl StreamEvent {
    pub fn content(&self) -> &str {
        match self {
            StreamEvent::Status(s)
            | StreamEvent::Token(s)
            | StreamEvent::ToolLog(s)
            | StreamEvent::Error(s) => s,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StreamEvent::Error(_))
    }
}

/// How a forwarded stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed,
}

/// Maps agent events to client events for one request
///
/// After the first terminal event (completion or failure) nothing else is
/// emitted, so a client sees at most one `error` and it is always last.
#[derive(Debug, Default)]
pub struct EventTranslator {
    outcome: Option<StreamOutcome>,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<StreamOutcome> {
        self.outcome
    }

    pub fn translate(&mut self, event: AgentEvent) -> Option<StreamEvent> {
        if self.is_finished() {
            return None;
        }

        match event {
            AgentEvent::ModelToken(text) if text.is_empty() => None,
            AgentEvent::ModelToken(text) => Some(StreamEvent::Token(text)),
            AgentEvent::ToolArgsFragment(fragment) => Some(StreamEvent::ToolLog(fragment)),
            AgentEvent::ToolStart { name, input } => Some(StreamEvent::Status(format!(
                "{} {} ({})...",
                SEARCHING_PREFIX, name, input
            ))),
            AgentEvent::ToolEnd { .. } => Some(StreamEvent::Status(FOUND_MESSAGE.to_string())),
            AgentEvent::Completed { .. } => {
                self.outcome = Some(StreamOutcome::Completed);
                None
            }
            AgentEvent::Failed(message) => {
                self.outcome = Some(StreamOutcome::Failed);
                Some(StreamEvent::Error(message))
            }
        }
    }

    /// Close out a stream whose source ended; an error if it never finished
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.is_finished() {
            return None;
        }
        self.outcome = Some(StreamOutcome::Failed);
        Some(StreamEvent::Error(UNEXPECTED_END.to_string()))
    }

    /// Forward every event from `events` to `writer` as NDJSON, flushing
    /// after each record
    ///
    /// A write error is returned immediately; the caller should treat it as
    /// the client having gone away.
    pub async fn forward<W>(
        &mut self,
        events: &mut mpsc::Receiver<AgentEvent>,
        writer: &mut W,
    ) -> std::io::Result<StreamOutcome>
    where
        W: AsyncWrite + Unpin,
    {
        let mut sent = 0usize;

        while let Some(event) = events.recv().await {
            if let Some(out) = self.translate(event) {
                ndjson::write_line(writer, &out).await?;
                sent += 1;
            }
            if self.is_finished() {
                break;
            }
        }

        if let Some(out) = self.finish() {
            warn!("Event source closed before a final answer");
            ndjson::write_line(writer, &out).await?;
            sent += 1;
        }

        debug!("Forwarded {} stream events", sent);
        Ok(self.outcome.unwrap_or(StreamOutcome::Failed))
    }
}
