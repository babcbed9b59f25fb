/// Embedding & Indexing
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2, 384-dim)
/// - HttpEmbeddingProvider for OpenAI-compatible embedding services
/// - RetryingEmbedder for bounded exponential backoff
/// - HNSW for vector similarity search
/// - Tantivy for keyword search
/// - Batch processing for ingestion
mod batch;
mod http;
mod keyword_index;
mod provider;
mod retry;
mod vector_index;

pub use batch::{BatchEmbedder, BatchResult};
pub use http::HttpEmbeddingProvider;
pub use keyword_index::{tokenize, KeywordIndex, KeywordIndexError, KeywordSearchResult};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use retry::{retry_with_backoff, RetryPolicy, RetryingEmbedder};
pub use vector_index::{HnswVectorStore, VectorIndexError, VectorMatch, VectorStore};

use crate::config::EmbeddingConfig;
use std::sync::Arc;

/// Build the configured provider, wrapped for retries
pub fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let inner: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "fastembed" => Arc::new(FastEmbedProvider::new(&config.model)?),
        "http" => Arc::new(
            HttpEmbeddingProvider::new(&config.endpoint, &config.model)
                .with_api_key_env(&config.api_key_env),
        ),
        other => {
            return Err(EmbeddingError::InitializationError(format!(
                "Unknown embedding provider: {}",
                other
            )))
        }
    };

    Ok(Arc::new(RetryingEmbedder::new(
        inner,
        RetryPolicy::from(&config.retry),
    )))
}
