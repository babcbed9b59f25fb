//! The retrieval tool, the only tool the model can call

use super::prompt::NO_RESULTS_MARKER;
use super::AgentError;
use crate::llm::{ToolCall, ToolDefinition};
use crate::retrieval::{HybridRetriever, Passage};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write;
use std::sync::Arc;
use tracing::debug;

pub const RETRIEVE_TOOL_NAME: &str = "retrieve_documents";

/// Schema offered to the model
pub fn retrieve_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: RETRIEVE_TOOL_NAME.to_string(),
        description: "Retrieve relevant passages from the uploaded document for a search query. \
                      Uses hybrid keyword and semantic search."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search the document for"
                }
            },
            "required": ["query"]
        }),
    }
}

#[derive(Debug, Deserialize)]
struct RetrieveArgs {
    query: String,
}

/// A tool call and, once executed, its result
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub result: Option<String>,
}

impl ToolInvocation {
    /// Validate a model-issued call against the retrieval tool's schema
    pub fn from_call(call: &ToolCall) -> Result<Self, AgentError> {
        if call.name != RETRIEVE_TOOL_NAME {
            return Err(AgentError::UnknownTool(call.name.clone()));
        }

        let raw = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };
        let arguments: Value = serde_json::from_str(raw).map_err(|e| {
            AgentError::MalformedToolArguments(format!("{}: {}", e, call.arguments))
        })?;

        Ok(Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments,
            result: None,
        })
    }

    /// The search query; blank queries are passed on and simply match less
    pub fn query(&self) -> Result<String, AgentError> {
        let args: RetrieveArgs = serde_json::from_value(self.arguments.clone())
            .map_err(|e| AgentError::MalformedToolArguments(format!("{}: {}", e, self.arguments)))?;
        Ok(args.query)
    }

    /// Attach the result; an invocation completes exactly once
    pub fn complete(self, result: String) -> Self {
        Self {
            result: Some(result),
            ..self
        }
    }
}

/// Render passages as the tool result text the model reads
pub fn format_passages(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return NO_RESULTS_MARKER.to_string();
    }

    let mut out = String::new();
    for passage in passages {
        let page = passage
            .page
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string());
        let source = if passage.source.is_empty() {
            "Unknown"
        } else {
            passage.source.as_str()
        };
        let _ = write!(
            out,
            "\n--- [Page {}] (Source: {}) ---\n{}\n",
            page, source, passage.text
        );
    }
    out
}

/// Executes retrieval calls with fixed `k` and weight
pub struct RetrievalTool {
    retriever: Arc<HybridRetriever>,
    k: usize,
    vector_weight: f32,
}

impl RetrievalTool {
    pub fn new(retriever: Arc<HybridRetriever>, k: usize, vector_weight: f32) -> Self {
        Self {
            retriever,
            k,
            vector_weight,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        retrieve_tool_definition()
    }

    /// Run a validated invocation, returning it with the result attached
    pub async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolInvocation, AgentError> {
        let query = invocation.query()?;
        let passages = self
            .retriever
            .search(&query, self.k, self.vector_weight)
            .await?;

        debug!("retrieve_documents({:?}) -> {} passages", query, passages.len());
        Ok(invocation.complete(format_passages(&passages)))
    }
}
