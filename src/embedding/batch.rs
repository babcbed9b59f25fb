/// Batch processor for efficient embedding generation during ingestion
use super::{EmbeddingError, EmbeddingProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Result of batch processing
#[derive(Debug)]
pub struct BatchResult {
    /// One embedding per input text, in input order
    pub embeddings: Vec<Vec<f32>>,
    pub batches: usize,
    pub duration_ms: u64,
}

/// Batch embedder for ingestion
///
/// Splits the chunk texts into fixed-size batches and embeds them in order,
/// optionally pausing between batches for rate-limited services.
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    pause: Duration,
}

impl BatchEmbedder {
    /// Create a new batch embedder
    ///
    /// # Arguments
    /// * `provider` - Embedding provider (normally already wrapped for retries)
    /// * `batch_size` - Number of texts to embed in one call
    /// * `pause` - Delay between consecutive batches
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, pause: Duration) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            pause,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed every text, failing on the first batch that cannot be embedded
    pub async fn embed_all(&self, texts: &[String]) -> Result<BatchResult, EmbeddingError> {
        let start = std::time::Instant::now();
        let total = texts.len();

        info!(
            "Embedding {} chunks in batches of {} with {}",
            total,
            self.batch_size,
            self.provider.model_name()
        );

        let mut embeddings = Vec::with_capacity(total);
        let mut batches = 0;
        let mut dimension: Option<usize> = None;

        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            if i > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            let batch_embeddings = self.provider.embed_batch(batch).await?;
            if batch_embeddings.len() != batch.len() {
                return Err(EmbeddingError::GenerationError(format!(
                    "Batch {} returned {} embeddings for {} texts",
                    i,
                    batch_embeddings.len(),
                    batch.len()
                )));
            }

            for embedding in &batch_embeddings {
                let expected = *dimension.get_or_insert(embedding.len());
                if embedding.len() != expected {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected,
                        actual: embedding.len(),
                    });
                }
            }

            embeddings.extend(batch_embeddings);
            batches += 1;
            debug!("Embedded batch {} ({} texts)", i, batch.len());
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Batch embedding complete: {} chunks, {} batches, {}ms",
            total, batches, duration_ms
        );

        Ok(BatchResult {
            embeddings,
            batches,
            duration_ms,
        })
    }
}
