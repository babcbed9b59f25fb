//! Generation loop driven end to end through the event translator

use async_trait::async_trait;
use folio::agent::{Conversation, GenerationLoop, LoopConfig, RetrievalTool, RETRIEVE_TOOL_NAME};
use folio::config::Config;
use folio::embedding::{BatchEmbedder, EmbeddingError, EmbeddingProvider};
use folio::llm::{LanguageModel, ModelDelta, ModelError, ModelStream, ToolDefinition, Turn};
use folio::retrieval::HybridRetriever;
use folio::store::{ChunkRecord, DocumentStore};
use folio::stream::{ndjson, EventTranslator, StreamEvent, StreamOutcome, FOUND_MESSAGE, SEARCHING_PREFIX};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct UnitEmbedder;

#[async_trait]
impl EmbeddingProvider for UnitEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![0.6, 0.8])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![0.6, 0.8]).collect())
    }

    fn model_name(&self) -> &str {
        "unit"
    }
}

/// Plays back one response per model call, repeating the last one
struct Script {
    responses: Vec<Vec<ModelDelta>>,
    calls: AtomicUsize,
}

impl Script {
    fn new(responses: Vec<Vec<ModelDelta>>) -> Arc<Self> {
        Arc::new(Self {
            responses,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LanguageModel for Script {
    async fn stream(
        &self,
        _turns: &[Turn],
        _tool: Option<&ToolDefinition>,
    ) -> Result<ModelStream, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let response = &self.responses[call.min(self.responses.len() - 1)];
        let deltas: Vec<Result<ModelDelta, ModelError>> = response.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(deltas)))
    }

    fn model_name(&self) -> &str {
        "script"
    }

    fn with_model(&self, _model: &str) -> Arc<dyn LanguageModel> {
        Script::new(self.responses.clone())
    }
}

/// Indexes fine, then fails every query embedding as if rate limited
struct ThrottledEmbedder;

#[async_trait]
impl EmbeddingProvider for ThrottledEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::RetriesExhausted {
            attempts: 5,
            last: "429 Too Many Requests".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![0.6, 0.8]).collect())
    }

    fn model_name(&self) -> &str {
        "throttled"
    }
}

/// Sends part of an answer, then drops the connection
struct BrokenStream;

#[async_trait]
impl LanguageModel for BrokenStream {
    async fn stream(
        &self,
        _turns: &[Turn],
        _tool: Option<&ToolDefinition>,
    ) -> Result<ModelStream, ModelError> {
        let deltas = vec![
            Ok(ModelDelta::text("It holds ")),
            Err(ModelError::Stream("connection reset".to_string())),
            Ok(ModelDelta::text("180 litres.")),
        ];
        Ok(Box::pin(futures::stream::iter(deltas)))
    }

    fn model_name(&self) -> &str {
        "broken"
    }

    fn with_model(&self, _model: &str) -> Arc<dyn LanguageModel> {
        Arc::new(BrokenStream)
    }
}

async fn retrieval_tool() -> Arc<RetrievalTool> {
    retrieval_tool_with(Arc::new(UnitEmbedder)).await
}

async fn retrieval_tool_with(embedder: Arc<dyn EmbeddingProvider>) -> Arc<RetrievalTool> {
    let store = Arc::new(DocumentStore::new(BatchEmbedder::new(
        embedder.clone(),
        10,
        Duration::ZERO,
    )));
    store
        .replace(vec![ChunkRecord {
            text: "Total capacity is 180 litres.".to_string(),
            page: Some(2),
            source: "fridge.pdf".to_string(),
            file_hash: "fridge".to_string(),
        }])
        .await
        .unwrap();

    let config = Config::default();
    let retriever = Arc::new(HybridRetriever::new(store, embedder, &config.retrieval));
    Arc::new(RetrievalTool::new(retriever, 6, 0.5))
}

fn tool_request() -> Vec<ModelDelta> {
    vec![
        ModelDelta::tool_call(0, Some("call_a"), Some(RETRIEVE_TOOL_NAME), "{\"query\":"),
        ModelDelta::tool_call(0, None, None, "\"capacity\"}"),
    ]
}

async fn run_to_ndjson(model: Arc<Script>, config: LoopConfig) -> (Vec<StreamEvent>, StreamOutcome) {
    run_with_tool(model, retrieval_tool().await, config).await
}

async fn run_with_tool(
    model: Arc<dyn LanguageModel>,
    tool: Arc<RetrievalTool>,
    config: LoopConfig,
) -> (Vec<StreamEvent>, StreamOutcome) {
    let generation = GenerationLoop::new(model, tool, config);
    let mut events = generation.spawn(
        Conversation::new(Vec::new(), "What is the capacity?"),
        CancellationToken::new(),
    );

    let mut output: Vec<u8> = Vec::new();
    let mut translator = EventTranslator::new();
    let outcome = translator.forward(&mut events, &mut output).await.unwrap();

    let text = String::from_utf8(output).unwrap();
    let parsed = text
        .lines()
        .map(|line| ndjson::parse_line::<StreamEvent>(line).unwrap())
        .collect();
    (parsed, outcome)
}

#[tokio::test]
async fn test_events_follow_causal_order() {
    let model = Script::new(vec![
        tool_request(),
        vec![
            ModelDelta::text("It holds "),
            ModelDelta::text("180 "),
            ModelDelta::text("litres."),
        ],
    ]);

    let (events, outcome) = run_to_ndjson(model.clone(), LoopConfig::default()).await;

    assert_eq!(outcome, StreamOutcome::Completed);
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert_eq!(events.len(), 7);
    assert_eq!(events[0], StreamEvent::ToolLog("{\"query\":".to_string()));
    assert_eq!(events[1], StreamEvent::ToolLog("\"capacity\"}".to_string()));
    assert!(matches!(&events[2], StreamEvent::Status(s) if s.starts_with(SEARCHING_PREFIX)));
    assert_eq!(events[3], StreamEvent::Status(FOUND_MESSAGE.to_string()));

    let answer: String = events[4..].iter().map(|e| e.content()).collect();
    assert_eq!(answer, "It holds 180 litres.");
    assert!(events[4..].iter().all(|e| matches!(e, StreamEvent::Token(_))));
}

#[tokio::test]
async fn test_endless_tool_requests_end_in_error() {
    let model = Script::new(vec![tool_request()]);
    let config = LoopConfig {
        max_cycles: 2,
        ..LoopConfig::default()
    };

    let (events, outcome) = run_to_ndjson(model.clone(), config).await;

    assert_eq!(outcome, StreamOutcome::Failed);
    assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    let last = events.last().unwrap();
    assert!(last.is_error());
    assert_eq!(events.iter().filter(|e| e.is_error()).count(), 1);
    assert_eq!(
        events
            .iter()
            .filter(|e| e.content() == FOUND_MESSAGE)
            .count(),
        2
    );
}

#[tokio::test]
async fn test_direct_answer_skips_tools() {
    let model = Script::new(vec![vec![ModelDelta::text(
        "I can only answer questions about the uploaded document. This topic is not covered.",
    )]]);

    let (events, outcome) = run_to_ndjson(model, LoopConfig::default()).await;

    assert_eq!(outcome, StreamOutcome::Completed);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StreamEvent::Token(_)));
}

#[tokio::test]
async fn test_unknown_tool_is_reported() {
    let model = Script::new(vec![vec![ModelDelta::tool_call(
        0,
        Some("call_x"),
        Some("browse_web"),
        "{}",
    )]]);

    let (events, outcome) = run_to_ndjson(model, LoopConfig::default()).await;

    assert_eq!(outcome, StreamOutcome::Failed);
    assert!(events.last().unwrap().content().contains("browse_web"));
}

#[tokio::test]
async fn test_embedding_failure_ends_with_one_error() {
    let model = Script::new(vec![
        tool_request(),
        vec![ModelDelta::text("It holds 180 litres.")],
    ]);
    let tool = retrieval_tool_with(Arc::new(ThrottledEmbedder)).await;

    let (events, outcome) = run_with_tool(model.clone(), tool, LoopConfig::default()).await;

    assert_eq!(outcome, StreamOutcome::Failed);
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(events.iter().filter(|e| e.is_error()).count(), 1);
    let last = events.last().unwrap();
    assert!(last.is_error());
    assert!(last.content().contains("429"));
    assert!(events.iter().all(|e| !matches!(e, StreamEvent::Token(_))));
    assert!(events.iter().all(|e| e.content() != FOUND_MESSAGE));
}

#[tokio::test]
async fn test_model_stream_error_after_first_token() {
    let (events, outcome) = run_with_tool(
        Arc::new(BrokenStream),
        retrieval_tool().await,
        LoopConfig::default(),
    )
    .await;

    assert_eq!(outcome, StreamOutcome::Failed);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], StreamEvent::Token("It holds ".to_string()));
    assert!(events[1].is_error());
    assert!(events[1].content().contains("connection reset"));
}
