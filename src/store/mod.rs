//! Active document context
//!
//! Holds the single document the daemon answers questions about. Readers
//! take a cheap `Arc` snapshot of the current document; ingestion builds the
//! replacement off to the side and swaps it in under a single-writer lock, so
//! a search in flight never sees a half-built index.

pub mod snapshot;

use crate::embedding::{BatchEmbedder, HnswVectorStore, KeywordIndex, KeywordIndexError, VectorStore};
use crate::error::{FolioError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One chunk as produced by the ingestion pipeline (one JSON line each)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub text: String,
    #[serde(default)]
    pub page: Option<u32>,
    pub source: String,
    pub file_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub page: Option<u32>,
    pub source: String,
    pub file_hash: String,
}

/// A chunk as held by a vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub source: String,
    pub file_hash: String,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

/// Result of `DocumentStore::replace`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    /// A document is active after the call
    pub added: bool,
    /// The same file was already active; nothing was re-embedded
    pub cached: bool,
    pub chunk_count: usize,
}

/// The document currently answering questions
pub struct ActiveDocument {
    info: DocumentInfo,
    vectors: Box<dyn VectorStore>,
    lexical: Mutex<Option<Arc<KeywordIndex>>>,
}

impl ActiveDocument {
    pub fn new(info: DocumentInfo, vectors: Box<dyn VectorStore>) -> Self {
        Self {
            info,
            vectors,
            lexical: Mutex::new(None),
        }
    }

    pub fn info(&self) -> &DocumentInfo {
        &self.info
    }

    pub fn vectors(&self) -> &dyn VectorStore {
        self.vectors.as_ref()
    }

    /// Keyword index over every stored chunk, built on first use
    pub fn keyword_index(&self) -> std::result::Result<Arc<KeywordIndex>, KeywordIndexError> {
        let mut slot = self
            .lexical
            .lock()
            .map_err(|_| KeywordIndexError::InitializationError("Index lock poisoned".to_string()))?;

        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }

        let chunks = self.vectors.get_all();
        let index = Arc::new(KeywordIndex::build(chunks.iter().map(|c| c.text.as_str()))?);
        debug!("Built keyword index over {} chunks", index.len());
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Drop the cached keyword index; the next search rebuilds it
    pub fn invalidate_keyword_index(&self) {
        if let Ok(mut slot) = self.lexical.lock() {
            *slot = None;
        }
    }

    pub fn has_keyword_index(&self) -> bool {
        self.lexical.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

/// Shared handle to the one active document
pub struct DocumentStore {
    active: RwLock<Option<Arc<ActiveDocument>>>,
    writer: tokio::sync::Mutex<()>,
    embedder: BatchEmbedder,
    snapshot_path: Option<PathBuf>,
}

impl DocumentStore {
    /// In-memory store; nothing survives a restart
    pub fn new(embedder: BatchEmbedder) -> Self {
        Self {
            active: RwLock::new(None),
            writer: tokio::sync::Mutex::new(()),
            embedder,
            snapshot_path: None,
        }
    }

    /// Persist the active document to `path` after every change
    pub fn with_snapshot_path(mut self, path: PathBuf) -> Self {
        self.snapshot_path = Some(path);
        self
    }

    /// Snapshot of the active document, if any
    pub async fn current(&self) -> Option<Arc<ActiveDocument>> {
        self.active.read().await.clone()
    }

    pub async fn info(&self) -> Option<DocumentInfo> {
        self.current().await.map(|doc| doc.info().clone())
    }

    /// Replace the active document with `chunks`
    ///
    /// Re-ingesting the file that is already active is a no-op reported as
    /// `cached`. An empty chunk set leaves the store untouched.
    pub async fn replace(&self, chunks: Vec<ChunkRecord>) -> Result<IngestOutcome> {
        let _guard = self.writer.lock().await;

        let chunks: Vec<ChunkRecord> = chunks
            .into_iter()
            .filter(|c| !c.text.trim().is_empty())
            .collect();

        let Some(first) = chunks.first() else {
            warn!("Ingest rejected: no chunks with text");
            return Ok(IngestOutcome {
                added: false,
                cached: false,
                chunk_count: 0,
            });
        };

        let file_hash = first.file_hash.clone();
        let source = first.source.clone();

        if let Some(active) = self.current().await {
            if !file_hash.is_empty() && active.info().file_hash == file_hash {
                info!("Document {} already active, skipping re-embed", source);
                return Ok(IngestOutcome {
                    added: true,
                    cached: true,
                    chunk_count: active.info().chunk_count,
                });
            }
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batch = self.embedder.embed_all(&texts).await?;

        let metadatas = chunks
            .iter()
            .map(|c| ChunkMetadata {
                page: c.page,
                source: c.source.clone(),
                file_hash: c.file_hash.clone(),
            })
            .collect();
        let ids = (0..texts.len())
            .map(|_| uuid::Uuid::new_v4().to_string())
            .collect();

        let mut vectors = HnswVectorStore::new(texts.len());
        vectors
            .add(texts, batch.embeddings, metadatas, ids)
            .map_err(|e| FolioError::Store(e.to_string()))?;

        let info = DocumentInfo {
            source,
            file_hash,
            chunk_count: vectors.len(),
            ingested_at: Utc::now(),
        };
        let chunk_count = info.chunk_count;
        let document = Arc::new(ActiveDocument::new(info, Box::new(vectors)));

        self.persist(&document).await;
        *self.active.write().await = Some(document);

        info!(
            "Active document replaced: {} chunks in {} batches ({}ms)",
            chunk_count, batch.batches, batch.duration_ms
        );

        Ok(IngestOutcome {
            added: true,
            cached: false,
            chunk_count,
        })
    }

    /// Drop the active document; returns whether there was one
    pub async fn clear(&self) -> Result<bool> {
        let _guard = self.writer.lock().await;

        let previous = self.active.write().await.take();
        if let Some(doc) = &previous {
            doc.invalidate_keyword_index();
            info!("Cleared active document {}", doc.info().source);
        }

        if let Some(path) = &self.snapshot_path {
            snapshot::remove(path)?;
        }

        Ok(previous.is_some())
    }

    /// Discard and rebuild the keyword index of the active document
    pub async fn rebuild_keyword_index(&self) -> Result<bool> {
        let Some(doc) = self.current().await else {
            return Ok(false);
        };

        doc.invalidate_keyword_index();
        let index = tokio::task::spawn_blocking(move || doc.keyword_index())
            .await
            .map_err(|e| FolioError::Store(format!("Index task failed: {}", e)))?
            .map_err(|e| FolioError::Store(e.to_string()))?;

        info!("Rebuilt keyword index ({} chunks)", index.len());
        Ok(true)
    }

    /// Restore the active document from the snapshot file, if present
    pub async fn load_snapshot(&self) -> Result<bool> {
        let Some(path) = &self.snapshot_path else {
            return Ok(false);
        };

        let _guard = self.writer.lock().await;

        let Some(snap) = snapshot::read(path)? else {
            debug!("No snapshot at {}", path.display());
            return Ok(false);
        };

        let mut vectors = HnswVectorStore::new(snap.chunks.len());
        let mut texts = Vec::with_capacity(snap.chunks.len());
        let mut metadatas = Vec::with_capacity(snap.chunks.len());
        let mut ids = Vec::with_capacity(snap.chunks.len());
        for chunk in snap.chunks {
            texts.push(chunk.text);
            metadatas.push(chunk.metadata);
            ids.push(chunk.id);
        }
        vectors
            .add(texts, snap.embeddings, metadatas, ids)
            .map_err(|e| FolioError::Store(format!("Failed to restore snapshot: {}", e)))?;

        info!(
            "Restored {} ({} chunks) from {}",
            snap.info.source,
            snap.info.chunk_count,
            path.display()
        );

        *self.active.write().await = Some(Arc::new(ActiveDocument::new(
            snap.info,
            Box::new(vectors),
        )));
        Ok(true)
    }

    async fn persist(&self, document: &ActiveDocument) {
        let Some(path) = self.snapshot_path.clone() else {
            return;
        };

        let snap = snapshot::Snapshot {
            version: snapshot::SNAPSHOT_VERSION,
            info: document.info().clone(),
            chunks: document.vectors().get_all().to_vec(),
            embeddings: document.vectors().embeddings().to_vec(),
        };

        // Compression and file IO stay off the runtime workers.
        // The in-memory document stays authoritative if the disk write fails.
        match tokio::task::spawn_blocking(move || snapshot::write(&path, &snap)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to persist snapshot: {}", e),
            Err(e) => warn!("Snapshot task failed: {}", e),
        }
    }
}
