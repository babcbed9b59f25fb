//! Agentic answer generation
//!
//! A bounded loop that alternates between asking the model and running the
//! retrieval tool until the model produces a final answer.

mod conversation;
mod generation;
pub mod prompt;
mod tool;

pub use conversation::Conversation;
pub use generation::{AgentEvent, GenerationLoop, LoopConfig, LoopState};
pub use tool::{
    format_passages, retrieve_tool_definition, RetrievalTool, ToolInvocation, RETRIEVE_TOOL_NAME,
};

use crate::llm::ModelError;
use crate::retrieval::SearchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Language model failed: {0}")]
    Model(#[from] ModelError),

    #[error("Document search failed: {0}")]
    Search(#[from] SearchError),

    #[error("Model sent malformed tool arguments: {0}")]
    MalformedToolArguments(String),

    #[error("Model requested unknown tool: {0}")]
    UnknownTool(String),

    #[error("Gave up after {0} tool rounds without a final answer")]
    CycleLimit(usize),

    #[error("Model stream went quiet for {0}s")]
    IdleTimeout(u64),

    #[error("Generation cancelled")]
    Cancelled,
}
