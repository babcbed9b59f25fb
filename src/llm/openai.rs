//! Streaming client for OpenAI-compatible chat completion APIs (Groq by
//! default)

use super::{
    LanguageModel, ModelDelta, ModelError, ModelStream, Role, ToolCallDelta, ToolDefinition, Turn,
};
use crate::config::LlmConfig;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{future, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, trace, warn};

const DONE_MARKER: &str = "[DONE]";

#[derive(Clone)]
pub struct OpenAiCompatModel {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiCompatModel {
    /// Build a client from config; the API key is read from the environment
    pub fn new(config: &LlmConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            warn!("{} is not set; model requests will fail", config.api_key_env);
        }

        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn request_body(&self, turns: &[Turn], tool: Option<&ToolDefinition>) -> Value {
        let messages: Vec<Value> = turns.iter().map(message_json).collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": true,
        });

        if let Some(tool) = tool {
            body["tools"] = json!([{
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            }]);
            body["tool_choice"] = json!("auto");
        }

        body
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn message_json(turn: &Turn) -> Value {
    let mut message = json!({
        "role": role_str(turn.role),
        "content": turn.content,
    });

    if !turn.tool_calls.is_empty() {
        message["tool_calls"] = turn
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments },
                })
            })
            .collect();
    }

    if let Some(id) = &turn.tool_call_id {
        message["tool_call_id"] = json!(id);
    }

    message
}

fn extract_api_error_message(event: &Value) -> Option<String> {
    let error = event.get("error")?;
    if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("An error occurred during streaming".to_string())
}

/// Parse one SSE data payload into a delta
///
/// Returns `Ok(None)` for keepalives and chunks that carry nothing visible.
pub(crate) fn parse_chunk(data: &str) -> Result<Option<ModelDelta>, ModelError> {
    if data.trim().is_empty() {
        return Ok(None);
    }

    let event: Value = serde_json::from_str(data)
        .map_err(|e| ModelError::Parse(format!("{}, data: {}", e, data)))?;

    if let Some(message) = extract_api_error_message(&event) {
        return Err(ModelError::Api(message));
    }

    let Some(delta) = event
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|choice| choice.get("delta"))
    else {
        return Ok(None);
    };

    let content = delta
        .get("content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let tool_calls: Vec<ToolCallDelta> = delta
        .get("tool_calls")
        .and_then(|c| c.as_array())
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(position, call)| {
                    let function = call.get("function");
                    ToolCallDelta {
                        index: call
                            .get("index")
                            .and_then(Value::as_u64)
                            .map(|i| i as usize)
                            .unwrap_or(position),
                        id: call.get("id").and_then(|v| v.as_str()).map(str::to_string),
                        name: function
                            .and_then(|f| f.get("name"))
                            .and_then(|v| v.as_str())
                            .filter(|n| !n.is_empty())
                            .map(str::to_string),
                        arguments: function
                            .and_then(|f| f.get("arguments"))
                            .and_then(|v| v.as_str())
                            .map(str::to_string),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    if content.is_none() && tool_calls.is_empty() {
        return Ok(None);
    }

    Ok(Some(ModelDelta {
        content,
        tool_calls,
    }))
}

#[async_trait]
impl LanguageModel for OpenAiCompatModel {
    async fn stream(
        &self,
        turns: &[Turn],
        tool: Option<&ToolDefinition>,
    ) -> Result<ModelStream, ModelError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ModelError::MissingApiKey("LLM API key".to_string()))?;

        debug!("Requesting {} with {} turns", self.model, turns.len());

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&self.request_body(turns, tool))
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ModelError::Http { status, message });
        }

        let stream = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(e) if e.data.trim() == DONE_MARKER))
            })
            .filter_map(|event| {
                future::ready(match event {
                    Ok(event) => {
                        trace!("SSE: {}", event.data);
                        parse_chunk(&event.data).transpose()
                    }
                    Err(e) => Some(Err(ModelError::Stream(e.to_string()))),
                })
            });

        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn with_model(&self, model: &str) -> Arc<dyn LanguageModel> {
        let mut other = self.clone();
        other.model = model.to_string();
        Arc::new(other)
    }
}
