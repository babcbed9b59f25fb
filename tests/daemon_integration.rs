use async_trait::async_trait;
use folio::agent::RETRIEVE_TOOL_NAME;
use folio::config::Config;
use folio::daemon::{Daemon, IpcClient, IpcRequest, SearchHit};
use folio::embedding::{EmbeddingError, EmbeddingProvider};
use folio::error::FolioError;
use folio::llm::{LanguageModel, ModelDelta, ModelError, ModelStream, Role, ToolDefinition, Turn};
use folio::store::ChunkRecord;
use folio::stream::StreamEvent;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

struct LengthEmbedder;

#[async_trait]
impl EmbeddingProvider for LengthEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![1.0, text.len() as f32 / 100.0])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| vec![1.0, t.len() as f32 / 100.0])
            .collect())
    }

    fn model_name(&self) -> &str {
        "length"
    }
}

/// Searches once for the question, then answers from the tool result
struct GroundedModel {
    name: String,
}

#[async_trait]
impl LanguageModel for GroundedModel {
    async fn stream(
        &self,
        turns: &[Turn],
        tool: Option<&ToolDefinition>,
    ) -> Result<ModelStream, ModelError> {
        let deltas = match (tool, turns.last()) {
            (None, _) => vec![ModelDelta::text(r#"["How big is it?","Is it loud?","Which class?"]"#)],
            (Some(_), Some(last)) if last.role == Role::Tool => vec![
                ModelDelta::text(format!("[{}] ", self.name)),
                ModelDelta::text("It holds 180 litres."),
            ],
            (Some(_), _) => vec![ModelDelta::tool_call(
                0,
                Some("call_1"),
                Some(RETRIEVE_TOOL_NAME),
                r#"{"query":"capacity litres"}"#,
            )],
        };
        Ok(Box::pin(futures::stream::iter(
            deltas.into_iter().map(Ok::<_, ModelError>),
        )))
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn with_model(&self, model: &str) -> Arc<dyn LanguageModel> {
        Arc::new(GroundedModel {
            name: model.to_string(),
        })
    }
}

fn chunks() -> Vec<ChunkRecord> {
    ["Total capacity is 180 litres.", "The door alarm sounds after two minutes."]
        .iter()
        .enumerate()
        .map(|(i, text)| ChunkRecord {
            text: text.to_string(),
            page: Some(i as u32 + 1),
            source: "fridge.pdf".to_string(),
            file_hash: "fridge".to_string(),
        })
        .collect()
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..100 {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("Daemon never bound {:?}", path);
}

#[tokio::test]
async fn test_daemon_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("folio.sock");

    let mut config = Config::default();
    config.storage.data_dir = temp_dir.path().to_path_buf();
    config.daemon.socket_path = socket_path.clone();

    let daemon = Daemon::with_components(
        config,
        Arc::new(LengthEmbedder),
        Arc::new(GroundedModel {
            name: "default-model".to_string(),
        }),
    );

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        daemon
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await
    });
    wait_for_socket(&socket_path).await;

    let client = IpcClient::new(socket_path.clone());

    // Ingest
    let response = client
        .send(&IpcRequest::Ingest { chunks: chunks() })
        .await
        .unwrap()
        .into_result()
        .unwrap();
    let data = response.data.unwrap();
    assert_eq!(data["chunk_count"], 2);
    assert_eq!(data["starter_questions"][0], "How big is it?");

    // Info
    let info = client.send(&IpcRequest::Info).await.unwrap();
    let data = info.data.unwrap();
    assert_eq!(data["loaded"], true);
    assert_eq!(data["filename"], "fridge.pdf");

    // Search
    let search = client
        .send(&IpcRequest::Search {
            query: "door alarm".to_string(),
            k: Some(1),
            vector_weight: Some(0.0),
        })
        .await
        .unwrap();
    let hits: Vec<SearchHit> = serde_json::from_value(search.data.unwrap()).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].passage.page, Some(2));

    // Ask, with a per-request model
    let mut events = Vec::new();
    client
        .ask(
            &IpcRequest::Ask {
                question: "How much does it hold?".to_string(),
                history: Vec::new(),
                model: Some("bigger-model".to_string()),
            },
            |event| events.push(event.clone()),
        )
        .await
        .unwrap();

    assert!(matches!(events[0], StreamEvent::ToolLog(_)));
    assert!(events.iter().all(|e| !e.is_error()));
    let answer: String = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Token(_)))
        .map(|e| e.content())
        .collect();
    assert_eq!(answer, "[bigger-model] It holds 180 litres.");

    // Empty question is refused before streaming
    let refused = client
        .ask(
            &IpcRequest::Ask {
                question: "  ".to_string(),
                history: Vec::new(),
                model: None,
            },
            |_| {},
        )
        .await;
    assert!(matches!(refused, Err(FolioError::Daemon(_))));

    // Clear and status
    client.send(&IpcRequest::Clear).await.unwrap().into_result().unwrap();
    let status = client.send(&IpcRequest::Status).await.unwrap();
    let data = status.data.unwrap();
    assert_eq!(data["model"], "default-model");
    assert!(data["document"].is_null());

    // Shutdown removes the socket
    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
    assert!(!socket_path.exists());

    let offline = client.send(&IpcRequest::Status).await;
    assert!(matches!(offline, Err(FolioError::DaemonNotRunning { .. })));
}

#[tokio::test]
async fn test_snapshot_restored_on_start() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("folio.sock");

    let mut config = Config::default();
    config.storage.data_dir = temp_dir.path().to_path_buf();
    config.daemon.socket_path = socket_path.clone();

    let model = || -> Arc<dyn LanguageModel> {
        Arc::new(GroundedModel {
            name: "m".to_string(),
        })
    };

    let first = Daemon::with_components(config.clone(), Arc::new(LengthEmbedder), model());
    first.store().replace(chunks()).await.unwrap();
    drop(first);

    let second = Daemon::with_components(config, Arc::new(LengthEmbedder), model());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        second
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await
    });
    wait_for_socket(&socket_path).await;

    let info = IpcClient::new(socket_path)
        .send(&IpcRequest::Info)
        .await
        .unwrap();
    assert_eq!(info.data.unwrap()["chunk_count"], 2);

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}

fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = temp_dir.path().to_path_buf();
    config.daemon.socket_path = temp_dir.path().join("folio.sock");
    config
}

#[tokio::test]
async fn test_half_closed_client_gets_full_answer() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);
    let socket_path = config.daemon.socket_path.clone();

    let daemon = Daemon::with_components(
        config,
        Arc::new(LengthEmbedder),
        Arc::new(GroundedModel {
            name: "m".to_string(),
        }),
    );
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        daemon
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await
    });
    wait_for_socket(&socket_path).await;

    IpcClient::new(socket_path.clone())
        .send(&IpcRequest::Ingest { chunks: chunks() })
        .await
        .unwrap()
        .into_result()
        .unwrap();

    // Send the question, then close the write side like `printf ... | nc -U`
    let mut stream = UnixStream::connect(&socket_path).await.unwrap();
    stream
        .write_all(b"{\"type\":\"ask\",\"question\":\"What is the capacity?\"}\n")
        .await
        .unwrap();
    stream.shutdown().await.unwrap();

    let mut output = String::new();
    timeout(Duration::from_secs(5), stream.read_to_string(&mut output))
        .await
        .unwrap()
        .unwrap();

    let events: Vec<StreamEvent> = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(events.iter().all(|e| !e.is_error()));
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::Token(t) if t == "It holds 180 litres.")));

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_with_connections_waiting_for_a_slot() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(&temp_dir);
    config.daemon.max_connections = 1;
    let socket_path = config.daemon.socket_path.clone();

    let daemon = Daemon::with_components(
        config,
        Arc::new(LengthEmbedder),
        Arc::new(GroundedModel {
            name: "m".to_string(),
        }),
    );
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        daemon
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await
    });
    wait_for_socket(&socket_path).await;

    // The first takes the only slot and never sends; the second waits for it
    let _holder = UnixStream::connect(&socket_path).await.unwrap();
    let _waiter = UnixStream::connect(&socket_path).await.unwrap();
    sleep(Duration::from_millis(100)).await;

    stop_tx.send(()).unwrap();
    timeout(Duration::from_secs(5), server)
        .await
        .expect("daemon did not stop with every slot taken")
        .unwrap()
        .unwrap();
    assert!(!socket_path.exists());
}
