/// Vector store contract and its HNSW implementation
use crate::store::{ChunkMetadata, StoredChunk};
use hnsw_rs::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// A nearest-neighbour hit, referring to a chunk by insertion ordinal
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub ordinal: usize,
    /// Cosine similarity (higher is more similar)
    pub similarity: f32,
}

/// Storage of chunk texts, metadata and embeddings with similarity search
///
/// Ordinals are assigned in insertion order and index into `get_all()`.
pub trait VectorStore: Send + Sync {
    /// Add parallel sequences of texts, embeddings, metadata and ids
    fn add(
        &mut self,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<ChunkMetadata>,
        ids: Vec<String>,
    ) -> Result<(), VectorIndexError>;

    /// Top `n` nearest chunks to `embedding`, most similar first
    fn query(&self, embedding: &[f32], n: usize) -> Result<Vec<VectorMatch>, VectorIndexError>;

    /// Every stored chunk in ordinal order
    fn get_all(&self) -> &[StoredChunk];

    /// Stored embeddings in ordinal order
    fn embeddings(&self) -> &[Vec<f32>];

    fn len(&self) -> usize {
        self.get_all().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// HNSW-backed vector store
///
/// Uses cosine distance; similarity is reported as `1 - distance`.
pub struct HnswVectorStore {
    index: Hnsw<'static, f32, DistCosine>,
    chunks: Vec<StoredChunk>,
    embeddings: Vec<Vec<f32>>,
    dimension: Option<usize>,
    ef_search: usize,
}

impl HnswVectorStore {
    /// Create an empty store sized for roughly `capacity` vectors
    pub fn new(capacity: usize) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            16,              // max_nb_connection
            capacity.max(1), // max_elements
            16,              // max_layer
            200,             // ef_construction
            DistCosine,
        );

        Self {
            index,
            chunks: Vec::new(),
            embeddings: Vec::new(),
            dimension: None,
            ef_search: 64,
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

impl VectorStore for HnswVectorStore {
    fn add(
        &mut self,
        texts: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<ChunkMetadata>,
        ids: Vec<String>,
    ) -> Result<(), VectorIndexError> {
        let n = texts.len();
        if embeddings.len() != n || metadatas.len() != n || ids.len() != n {
            return Err(VectorIndexError::InsertError(format!(
                "Length mismatch: {} texts, {} embeddings, {} metadatas, {} ids",
                n,
                embeddings.len(),
                metadatas.len(),
                ids.len()
            )));
        }

        for embedding in &embeddings {
            let expected = *self.dimension.get_or_insert(embedding.len());
            if embedding.len() != expected {
                return Err(VectorIndexError::InvalidDimension {
                    expected,
                    actual: embedding.len(),
                });
            }
            if embedding.iter().all(|v| *v == 0.0) {
                return Err(VectorIndexError::InsertError(
                    "Zero vector has no cosine direction".to_string(),
                ));
            }
        }

        let rows = texts.into_iter().zip(embeddings).zip(metadatas).zip(ids);
        for (((text, embedding), metadata), id) in rows {
            let ordinal = self.chunks.len();
            self.index.insert((embedding.as_slice(), ordinal));
            self.chunks.push(StoredChunk { id, text, metadata });
            self.embeddings.push(embedding);
        }

        Ok(())
    }

    fn query(&self, embedding: &[f32], n: usize) -> Result<Vec<VectorMatch>, VectorIndexError> {
        if n == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(expected) = self.dimension {
            if embedding.len() != expected {
                return Err(VectorIndexError::InvalidDimension {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        let knbn = n.min(self.chunks.len());
        let ef = self.ef_search.max(knbn);
        let mut neighbours = self.index.search(embedding, knbn, ef);
        neighbours.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(neighbours
            .into_iter()
            .filter(|nb| nb.d_id < self.chunks.len())
            .take(knbn)
            .map(|nb| VectorMatch {
                ordinal: nb.d_id,
                similarity: 1.0 - nb.distance,
            })
            .collect())
    }

    fn get_all(&self) -> &[StoredChunk] {
        &self.chunks
    }

    fn embeddings(&self) -> &[Vec<f32>] {
        &self.embeddings
    }
}
