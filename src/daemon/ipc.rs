// Inter-process communication via Unix domain sockets with newline-delimited JSON

use crate::error::{FolioError, Result};
use crate::llm::Turn;
use crate::retrieval::Passage;
use crate::store::ChunkRecord;
use crate::stream::{ndjson, StreamEvent};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Maximum request line size (32MB, enough for a large chunk set)
const MAX_MESSAGE_SIZE: u64 = 32 * 1024 * 1024;

/// Requests sent from the CLI to the daemon, one JSON line each
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IpcRequest {
    /// Replace the active document with these chunks
    Ingest { chunks: Vec<ChunkRecord> },
    /// Answer a question; the reply is a stream of `StreamEvent` lines
    Ask {
        question: String,
        #[serde(default)]
        history: Vec<Turn>,
        #[serde(default)]
        model: Option<String>,
    },
    /// Run hybrid retrieval directly
    Search {
        query: String,
        #[serde(default)]
        k: Option<usize>,
        #[serde(default)]
        vector_weight: Option<f32>,
    },
    /// Describe the active document
    Info,
    /// Drop the active document
    Clear,
    /// Request daemon status
    Status,
}

/// IPC response message sent from daemon back to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    /// Create a successful response
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Create a successful response with data
    pub fn success_with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Turn an error response into `Err`
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(FolioError::Daemon(
                self.message.unwrap_or_else(|| "Request failed".to_string()),
            ))
        }
    }
}

/// Search hit as returned over IPC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub passage: Passage,
    pub fused_score: f32,
}

/// Unix domain socket server for IPC
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listener: None,
        }
    }

    /// Bind to the socket path and start listening
    pub async fn bind(&mut self) -> Result<()> {
        // A stale socket from a crashed daemon blocks bind
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| FolioError::Io {
                source: e,
                context: format!("Failed to remove existing socket: {:?}", self.socket_path),
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FolioError::Io {
                source: e,
                context: format!("Failed to create socket directory: {:?}", parent),
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| FolioError::Io {
            source: e,
            context: format!("Failed to bind to socket: {:?}", self.socket_path),
        })?;

        self.listener = Some(listener);

        tracing::info!("IPC server listening on {:?}", self.socket_path);
        Ok(())
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<UnixStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| FolioError::Daemon("Server not bound".to_string()))?;

        let (stream, _addr) = listener.accept().await.map_err(|e| FolioError::Io {
            source: e,
            context: "Failed to accept connection".to_string(),
        })?;

        Ok(stream)
    }

    /// Shutdown the server and clean up socket file
    pub fn shutdown(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| FolioError::Io {
                source: e,
                context: format!("Failed to remove socket: {:?}", self.socket_path),
            })?;
        }
        Ok(())
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Read one request line
pub async fn read_request<R>(reader: &mut R) -> Result<IpcRequest>
where
    R: AsyncBufRead + Unpin,
{
    read_request_within(reader, MAX_MESSAGE_SIZE).await
}

async fn read_request_within<R>(reader: &mut R, max_size: u64) -> Result<IpcRequest>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = (&mut *reader)
        .take(max_size)
        .read_line(&mut line)
        .await
        .map_err(|e| FolioError::Io {
            source: e,
            context: "Failed to read request".to_string(),
        })?;

    if read == 0 {
        return Err(FolioError::Daemon(
            "Connection closed before a request was sent".to_string(),
        ));
    }

    if !line.ends_with('\n') && read as u64 >= max_size {
        return Err(FolioError::InvalidRequest(format!(
            "Request too large (max: {} bytes)",
            max_size
        )));
    }

    ndjson::parse_line(&line).map_err(|e| FolioError::Json {
        source: e,
        context: "Failed to deserialize IPC request".to_string(),
    })
}

/// Write one response line
pub async fn write_response<W>(writer: &mut W, response: &IpcResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    ndjson::write_line(writer, response)
        .await
        .map_err(|e| FolioError::Io {
            source: e,
            context: "Failed to write response".to_string(),
        })
}

/// One line of an `ask` reply: a stream event, or an error response when
/// the request was refused before streaming started
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AskLine {
    Event(StreamEvent),
    Response(IpcResponse),
}

/// IPC client for sending messages to the daemon
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    /// Create a new IPC client
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    async fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                    FolioError::DaemonNotRunning {
                        path: self.socket_path.clone(),
                    }
                }
                _ => FolioError::Io {
                    source: e,
                    context: format!("Failed to connect to daemon at {:?}", self.socket_path),
                },
            })
    }

    async fn open(&self, request: &IpcRequest) -> Result<BufReader<UnixStream>> {
        let mut stream = self.connect().await?;
        ndjson::write_line(&mut stream, request)
            .await
            .map_err(|e| FolioError::Io {
                source: e,
                context: "Failed to send request".to_string(),
            })?;
        Ok(BufReader::new(stream))
    }

    /// Connect to the daemon and send a request, returning the response
    pub async fn send(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut reader = self.open(request).await?;

        ndjson::read_line(&mut reader)
            .await
            .map_err(|e| FolioError::Io {
                source: e,
                context: "Failed to read response".to_string(),
            })?
            .ok_or_else(|| FolioError::Daemon("Daemon closed the connection".to_string()))
    }

    /// Send an `ask` request and hand each streamed event to `on_event`
    ///
    /// Returns once the daemon closes the stream.
    pub async fn ask<F>(&self, request: &IpcRequest, mut on_event: F) -> Result<()>
    where
        F: FnMut(&StreamEvent),
    {
        let mut reader = self.open(request).await?;

        loop {
            let line: Option<AskLine> =
                ndjson::read_line(&mut reader)
                    .await
                    .map_err(|e| FolioError::Io {
                        source: e,
                        context: "Failed to read stream event".to_string(),
                    })?;

            match line {
                None => return Ok(()),
                Some(AskLine::Event(event)) => on_event(&event),
                Some(AskLine::Response(response)) => {
                    response.into_result()?;
                    return Ok(());
                }
            }
        }
    }
}
