//! The bounded ask-model / await-tool state machine

use super::tool::{RetrievalTool, ToolInvocation};
use super::{AgentError, Conversation};
use crate::config::Config;
use crate::llm::{LanguageModel, ModelResponse, ResponseAccumulator, ToolCall, Turn};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the event channel between the loop and its consumer
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    AskModel,
    AwaitTool(Vec<ToolCall>),
    Done(String),
}

/// Internal events, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Visible answer text
    ModelToken(String),
    /// Raw fragment of tool-call arguments
    ToolArgsFragment(String),
    ToolStart { name: String, input: String },
    ToolEnd { name: String, output: String },
    Completed { answer: String },
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum tool rounds before the request is abandoned
    pub max_cycles: usize,
    /// Longest wait for the next model stream chunk
    pub idle_timeout: Duration,
}

impl LoopConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_cycles: config.agent.max_cycles,
            idle_timeout: Duration::from_secs(config.llm.idle_timeout_secs),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_cycles: 5,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// One request's generation loop; not shared between requests
pub struct GenerationLoop {
    model: Arc<dyn LanguageModel>,
    tool: Arc<RetrievalTool>,
    config: LoopConfig,
}

async fn emit(events: &mpsc::Sender<AgentEvent>, event: AgentEvent) -> Result<(), AgentError> {
    events.send(event).await.map_err(|_| AgentError::Cancelled)
}

impl GenerationLoop {
    pub fn new(model: Arc<dyn LanguageModel>, tool: Arc<RetrievalTool>, config: LoopConfig) -> Self {
        Self {
            model,
            tool,
            config,
        }
    }

    /// Drive the conversation to a final answer
    ///
    /// Emits `Completed` on success; a failure is returned, not emitted.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<String, AgentError> {
        let mut state = LoopState::AskModel;
        let mut cycles = 0;

        loop {
            state = match state {
                LoopState::AskModel => {
                    debug!("ASK_MODEL (cycle {})", cycles);
                    let (text, response) = self.ask_model(conversation, events).await?;
                    match response {
                        ModelResponse::FinalAnswer(answer) => LoopState::Done(answer),
                        ModelResponse::ToolRequests(calls) => {
                            conversation.push(Turn::assistant_tool_calls(text, calls.clone()));
                            LoopState::AwaitTool(calls)
                        }
                    }
                }
                LoopState::AwaitTool(calls) => {
                    cycles += 1;
                    if cycles > self.config.max_cycles {
                        warn!("Model still requesting tools after {} rounds", self.config.max_cycles);
                        return Err(AgentError::CycleLimit(self.config.max_cycles));
                    }
                    debug!("AWAIT_TOOL (cycle {}, {} calls)", cycles, calls.len());

                    for call in &calls {
                        let invocation = ToolInvocation::from_call(call)?;
                        emit(
                            events,
                            AgentEvent::ToolStart {
                                name: invocation.tool_name.clone(),
                                input: invocation.arguments.to_string(),
                            },
                        )
                        .await?;

                        let invocation = self.tool.invoke(invocation).await?;
                        let output = invocation.result.unwrap_or_default();

                        emit(
                            events,
                            AgentEvent::ToolEnd {
                                name: invocation.tool_name,
                                output: output.clone(),
                            },
                        )
                        .await?;
                        conversation.push(Turn::tool(invocation.call_id, output));
                    }

                    LoopState::AskModel
                }
                LoopState::Done(answer) => {
                    info!("Answer complete after {} tool rounds", cycles);
                    conversation.push(Turn::assistant(answer.clone()));
                    emit(
                        events,
                        AgentEvent::Completed {
                            answer: answer.clone(),
                        },
                    )
                    .await?;
                    return Ok(answer);
                }
            };
        }
    }

    /// Stream one model response, forwarding deltas as they arrive
    async fn ask_model(
        &self,
        conversation: &Conversation,
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<(String, ModelResponse), AgentError> {
        let definition = self.tool.definition();
        let mut stream = self
            .model
            .stream(conversation.turns(), Some(&definition))
            .await?;

        let mut accumulator = ResponseAccumulator::new();
        loop {
            let next = tokio::time::timeout(self.config.idle_timeout, stream.next())
                .await
                .map_err(|_| AgentError::IdleTimeout(self.config.idle_timeout.as_secs()))?;

            let Some(delta) = next else {
                break;
            };
            let delta = delta?;

            if let Some(content) = &delta.content {
                emit(events, AgentEvent::ModelToken(content.clone())).await?;
            }
            for fragment in &delta.tool_calls {
                if let Some(arguments) = fragment.arguments.as_ref().filter(|a| !a.is_empty()) {
                    emit(events, AgentEvent::ToolArgsFragment(arguments.clone())).await?;
                }
            }

            accumulator.push(&delta);
        }

        let text = accumulator.text().to_string();
        Ok((text, accumulator.finish()))
    }

    /// Run on a background task, reporting through the returned channel
    ///
    /// The channel ends after `Completed` or `Failed`. Cancelling the token
    /// (or dropping the receiver) stops the loop at its next suspension point
    /// without a `Failed` event.
    pub fn spawn(
        self,
        conversation: Conversation,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            let mut conversation = conversation;
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Generation cancelled by caller");
                }
                result = self.run(&mut conversation, &tx) => match result {
                    Ok(_) => {}
                    Err(AgentError::Cancelled) => debug!("Event consumer went away"),
                    Err(e) => {
                        warn!("Generation failed: {}", e);
                        let _ = tx.send(AgentEvent::Failed(e.to_string())).await;
                    }
                },
            }
        });

        rx
    }
}
