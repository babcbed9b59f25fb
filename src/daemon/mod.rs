// Daemon module: the long-lived process holding the active document

mod ipc;
mod signals;

pub use ipc::{read_request, write_response, IpcClient, IpcRequest, IpcResponse, IpcServer, SearchHit};
pub use signals::{ShutdownSignal, SignalHandler};

use crate::agent::{Conversation, GenerationLoop, LoopConfig, RetrievalTool};
use crate::answer::starter_questions;
use crate::config::{expand_tilde, Config};
use crate::embedding::{build_provider, BatchEmbedder, EmbeddingProvider};
use crate::error::{FolioError, Result};
use crate::llm::{LanguageModel, OpenAiCompatModel, Turn};
use crate::retrieval::HybridRetriever;
use crate::store::{snapshot, ChunkRecord, DocumentStore};
use crate::stream::EventTranslator;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

/// State shared by every connection handler
struct Shared {
    config: Config,
    store: Arc<DocumentStore>,
    retriever: Arc<HybridRetriever>,
    model: Arc<dyn LanguageModel>,
    starters: RwLock<Vec<String>>,
    started_at: DateTime<Utc>,
    shutdown: CancellationToken,
}

/// Main daemon struct that manages the lifecycle and components
pub struct Daemon {
    shared: Arc<Shared>,
}

impl Daemon {
    /// Create a daemon with the configured embedding provider and chat model
    pub fn new(config: Config) -> Result<Self> {
        let embedder = build_provider(&config.embedding)?;
        let model: Arc<dyn LanguageModel> = Arc::new(OpenAiCompatModel::new(&config.llm));
        Ok(Self::with_components(config, embedder, model))
    }

    /// Create a daemon around caller-supplied providers
    pub fn with_components(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let batch = BatchEmbedder::new(
            embedder.clone(),
            config.embedding.batch_size,
            Duration::from_millis(config.embedding.batch_pause_ms),
        );
        let data_dir = expand_tilde(&config.storage.data_dir);
        let store = Arc::new(
            DocumentStore::new(batch).with_snapshot_path(snapshot::snapshot_path(&data_dir)),
        );
        let retriever = Arc::new(HybridRetriever::new(
            store.clone(),
            embedder,
            &config.retrieval,
        ));

        Self {
            shared: Arc::new(Shared {
                config,
                store,
                retriever,
                model,
                starters: RwLock::new(Vec::new()),
                started_at: Utc::now(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.shared.store
    }

    /// Serve until SIGTERM, SIGINT or SIGHUP
    pub async fn run_foreground(&self) -> Result<()> {
        let mut signal_handler = SignalHandler::new()?;
        self.run_until(async move {
            let received = signal_handler.wait().await;
            tracing::info!("Shutdown signal received ({})", received);
        })
        .await
    }

    /// Serve until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        match self.shared.store.load_snapshot().await {
            Ok(true) => tracing::info!("Restored active document from snapshot"),
            Ok(false) => {}
            Err(e) => tracing::warn!("Ignoring unreadable snapshot: {}", e),
        }

        let socket_path = expand_tilde(&self.shared.config.daemon.socket_path);
        let mut ipc_server = IpcServer::new(socket_path);
        ipc_server.bind().await?;

        let connections = Arc::new(Semaphore::new(self.shared.config.daemon.max_connections));
        tracing::info!("Daemon started successfully");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = ipc_server.accept() => {
                    let stream = match accepted {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::warn!("{}", e);
                            continue;
                        }
                    };

                    // Permit waits must not stall the accept loop
                    let connections = connections.clone();
                    let shared = self.shared.clone();
                    tokio::spawn(async move {
                        let permit = tokio::select! {
                            permit = connections.acquire_owned() => match permit {
                                Ok(permit) => permit,
                                Err(_) => return,
                            },
                            _ = shared.shutdown.cancelled() => return,
                        };
                        if let Err(e) = handle_client(stream, shared).await {
                            tracing::error!("Client handler error: {}", e);
                        }
                        drop(permit);
                    });
                }

                _ = &mut shutdown => break,
            }
        }

        tracing::info!("Shutting down daemon");
        self.shared.shutdown.cancel();
        ipc_server.shutdown()?;
        tracing::info!("Daemon shutdown complete");

        Ok(())
    }
}

/// Handle a client connection: one request, then one response or a stream
async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = match read_request(&mut reader).await {
        Ok(request) => request,
        Err(e) => {
            return match refusal(&e) {
                Some(response) => write_response(&mut write_half, &response).await,
                None => Err(e),
            };
        }
    };

    let response = match request {
        IpcRequest::Ask {
            question,
            history,
            model,
        } => {
            if question.trim().is_empty() {
                IpcResponse::error("Question must not be empty")
            } else {
                stream_answer(&shared, question, history, model, reader, &mut write_half).await;
                return Ok(());
            }
        }
        IpcRequest::Ingest { chunks } => ingest(&shared, chunks).await,
        IpcRequest::Search {
            query,
            k,
            vector_weight,
        } => {
            let k = k.unwrap_or(shared.config.retrieval.k);
            let weight = vector_weight.unwrap_or(shared.config.retrieval.vector_weight);
            match shared.retriever.search_ranked(&query, k, weight).await {
                Ok(results) => {
                    let hits: Vec<SearchHit> = results
                        .into_iter()
                        .map(|r| SearchHit {
                            passage: r.passage,
                            fused_score: r.fused_score,
                        })
                        .collect();
                    IpcResponse::success_with_data(json!(hits))
                }
                Err(e) => IpcResponse::error(e.to_string()),
            }
        }
        IpcRequest::Info => document_info(&shared).await,
        IpcRequest::Clear => match shared.store.clear().await {
            Ok(true) => {
                shared.starters.write().await.clear();
                IpcResponse::success("Document cleared")
            }
            Ok(false) => IpcResponse::success("No document loaded"),
            Err(e) => IpcResponse::error(e.to_string()),
        },
        IpcRequest::Status => IpcResponse::success_with_data(json!({
            "running": true,
            "model": shared.model.model_name(),
            "started_at": shared.started_at,
            "document": shared.store.info().await,
        })),
    };

    write_response(&mut write_half, &response).await
}

/// Reply owed to a client whose request could not be read, if it can
/// still receive one
fn refusal(error: &FolioError) -> Option<IpcResponse> {
    match error {
        FolioError::Json { .. } | FolioError::InvalidRequest(_) => {
            Some(IpcResponse::error(error.to_string()))
        }
        _ => None,
    }
}

async fn ingest(shared: &Shared, chunks: Vec<ChunkRecord>) -> IpcResponse {
    let outcome = match shared.store.replace(chunks).await {
        Ok(outcome) => outcome,
        Err(e) => return IpcResponse::error(e.to_string()),
    };

    if !outcome.added {
        return IpcResponse {
            success: false,
            message: Some("No text chunks to ingest".to_string()),
            data: Some(json!(outcome)),
        };
    }

    if !outcome.cached || shared.starters.read().await.is_empty() {
        refresh_starters(shared).await;
    }

    IpcResponse::success_with_data(json!({
        "added": outcome.added,
        "cached": outcome.cached,
        "chunk_count": outcome.chunk_count,
        "starter_questions": *shared.starters.read().await,
    }))
}

async fn refresh_starters(shared: &Shared) {
    let questions = match shared.store.current().await {
        Some(doc) => starter_questions(shared.model.as_ref(), doc.vectors().get_all()).await,
        None => Vec::new(),
    };
    *shared.starters.write().await = questions;
}

async fn document_info(shared: &Shared) -> IpcResponse {
    let Some(info) = shared.store.info().await else {
        return IpcResponse::success_with_data(json!({ "loaded": false }));
    };

    // A document restored from a snapshot has no questions yet
    if shared.starters.read().await.is_empty() {
        refresh_starters(shared).await;
    }

    IpcResponse::success_with_data(json!({
        "loaded": true,
        "filename": info.source,
        "file_hash": info.file_hash,
        "chunk_count": info.chunk_count,
        "ingested_at": info.ingested_at,
        "starter_questions": *shared.starters.read().await,
    }))
}

/// Run a generation loop and stream its events to the client
///
/// A failed write means the client went away and cancels generation. The
/// read side is only watched for errors; a client may half-close after
/// sending its request and still receive the full stream.
async fn stream_answer<R, W>(
    shared: &Shared,
    question: String,
    history: Vec<Turn>,
    model: Option<String>,
    mut reader: R,
    writer: &mut W,
) where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let model = match model {
        Some(name) if name != shared.model.model_name() => shared.model.with_model(&name),
        _ => shared.model.clone(),
    };
    tracing::info!("Answering with {}: {:?}", model.model_name(), question);

    let retrieval = &shared.config.retrieval;
    let tool = Arc::new(RetrievalTool::new(
        shared.retriever.clone(),
        retrieval.k,
        retrieval.vector_weight,
    ));
    let generation = GenerationLoop::new(model, tool, LoopConfig::from_config(&shared.config));

    let cancel = shared.shutdown.child_token();
    let mut events = generation.spawn(Conversation::new(history, &question), cancel.clone());
    let mut translator = EventTranslator::new();

    tokio::select! {
        forwarded = translator.forward(&mut events, writer) => match forwarded {
            Ok(outcome) => tracing::debug!("Answer stream ended: {:?}", outcome),
            Err(e) => {
                tracing::info!("Client disconnected mid-answer: {}", e);
                cancel.cancel();
            }
        },
        e = read_error(&mut reader) => {
            tracing::info!("Client connection failed mid-answer: {}", e);
            cancel.cancel();
        }
    }
}

/// Resolves only when reading fails; EOF and stray bytes are ignored
async fn read_error<R>(reader: &mut R) -> std::io::Error
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut discard = [0u8; 256];
    loop {
        match reader.read(&mut discard).await {
            Ok(0) => std::future::pending::<()>().await,
            Ok(_) => {}
            Err(e) => return e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use crate::llm::{ModelDelta, ModelError, ModelStream, ToolDefinition};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FlatEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FlatEmbedder {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![text.len() as f32, 1.0, 0.5])
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0, 0.5]).collect())
        }

        fn model_name(&self) -> &str {
            "flat"
        }
    }

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn stream(
            &self,
            _turns: &[Turn],
            _tool: Option<&ToolDefinition>,
        ) -> std::result::Result<ModelStream, ModelError> {
            Ok(Box::pin(futures::stream::iter(vec![Ok::<_, ModelError>(
                ModelDelta::text("[\"Q1?\",\"Q2?\",\"Q3?\"]"),
            )])))
        }

        fn model_name(&self) -> &str {
            "echo"
        }

        fn with_model(&self, _model: &str) -> Arc<dyn LanguageModel> {
            Arc::new(EchoModel)
        }
    }

    fn daemon(dir: &TempDir) -> Daemon {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.daemon.socket_path = dir.path().join("folio.sock");
        Daemon::with_components(config, Arc::new(FlatEmbedder), Arc::new(EchoModel))
    }

    fn chunk(text: &str) -> ChunkRecord {
        ChunkRecord {
            text: text.to_string(),
            page: Some(1),
            source: "a.pdf".to_string(),
            file_hash: "h1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ingest_reports_starters() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir);

        let response = ingest(&daemon.shared, vec![chunk("alpha"), chunk("beta")]).await;
        assert!(response.success);
        let data = response.data.unwrap();
        assert_eq!(data["chunk_count"], 2);
        assert_eq!(data["cached"], false);
        assert_eq!(data["starter_questions"][0], "Q1?");

        let again = ingest(&daemon.shared, vec![chunk("alpha")]).await;
        assert_eq!(again.data.unwrap()["cached"], true);
    }

    #[tokio::test]
    async fn test_ingest_rejects_blank_chunks() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir);

        let response = ingest(&daemon.shared, vec![chunk("  ")]).await;
        assert!(!response.success);
        assert_eq!(response.data.unwrap()["added"], false);
    }

    #[test]
    fn test_unreadable_requests_get_a_reply() {
        let oversized = FolioError::InvalidRequest("Request too large".to_string());
        let reply = refusal(&oversized).unwrap();
        assert!(!reply.success);
        assert!(reply.message.unwrap().contains("too large"));

        let garbage = FolioError::Json {
            source: serde_json::from_str::<IpcRequest>("nope").unwrap_err(),
            context: "Failed to deserialize IPC request".to_string(),
        };
        assert!(refusal(&garbage).is_some());

        let closed = FolioError::Daemon("Connection closed before a request was sent".to_string());
        assert!(refusal(&closed).is_none());
    }

    #[tokio::test]
    async fn test_info_without_document() {
        let dir = TempDir::new().unwrap();
        let daemon = daemon(&dir);

        let response = document_info(&daemon.shared).await;
        assert_eq!(response.data.unwrap()["loaded"], false);
    }
}
