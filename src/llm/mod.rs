//! Language model abstraction
//!
//! Conversation turns, the single bound tool's schema, and a streaming model
//! trait. Responses arrive as deltas; `ResponseAccumulator` folds them into
//! either a final answer or a list of tool calls.

mod openai;

pub use openai::OpenAiCompatModel;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("API key variable {0} is not set")]
    MissingApiKey(String),

    #[error("Model service unreachable: {0}")]
    Transport(String),

    #[error("Model service returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Model API error: {0}")]
    Api(String),

    #[error("Model stream error: {0}")]
    Stream(String),

    #[error("Malformed model output: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument text as emitted by the model
    pub arguments: String,
}

/// One entry of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Turn {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn that requested tools
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Result of a tool call, linked back by call id
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// JSON-schema description of a callable tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// What the model decided for one step
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    FinalAnswer(String),
    ToolRequests(Vec<ToolCall>),
}

/// Fragment of a tool call as streamed; fields arrive piecemeal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// One streamed increment of a model response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
}

impl ModelDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(index: usize, id: Option<&str>, name: Option<&str>, arguments: &str) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCallDelta {
                index,
                id: id.map(str::to_string),
                name: name.map(str::to_string),
                arguments: Some(arguments.to_string()),
            }],
        }
    }
}

pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelDelta, ModelError>> + Send>>;

/// A chat model that can call one bound tool
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start a response to `turns`, optionally offering `tool`
    async fn stream(
        &self,
        turns: &[Turn],
        tool: Option<&ToolDefinition>,
    ) -> Result<ModelStream, ModelError>;

    fn model_name(&self) -> &str;

    /// Same backend, different model
    fn with_model(&self, model: &str) -> Arc<dyn LanguageModel>;
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds streamed deltas into a `ModelResponse`
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
    calls: BTreeMap<usize, PartialCall>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &ModelDelta) {
        if let Some(content) = &delta.content {
            self.text.push_str(content);
        }

        for fragment in &delta.tool_calls {
            let call = self.calls.entry(fragment.index).or_default();
            if let Some(id) = fragment.id.as_ref().filter(|id| !id.is_empty()) {
                call.id.get_or_insert_with(|| id.clone());
            }
            if let Some(name) = &fragment.name {
                if call.name.is_empty() {
                    call.name.push_str(name);
                }
            }
            if let Some(arguments) = &fragment.arguments {
                call.arguments.push_str(arguments);
            }
        }
    }

    /// Visible text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    /// Tool calls in stream index order if any were requested, else the text
    pub fn finish(self) -> ModelResponse {
        if self.calls.is_empty() {
            return ModelResponse::FinalAnswer(self.text);
        }

        ModelResponse::ToolRequests(
            self.calls
                .into_iter()
                .map(|(index, call)| ToolCall {
                    id: call.id.unwrap_or_else(|| format!("call_{}", index)),
                    name: call.name,
                    arguments: call.arguments,
                })
                .collect(),
        )
    }
}

/// Run `turns` without tools and collect the visible text
pub async fn complete_text(model: &dyn LanguageModel, turns: &[Turn]) -> Result<String, ModelError> {
    let mut stream = model.stream(turns, None).await?;
    let mut accumulator = ResponseAccumulator::new();
    while let Some(delta) = stream.next().await {
        accumulator.push(&delta?);
    }
    Ok(accumulator.text)
}
