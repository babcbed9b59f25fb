//! Hybrid search combining semantic and keyword search

use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::retrieval::{
    fingerprint, reciprocal_rank_fusion, Fingerprint, FingerprintMode, FusionConfig, Passage,
    RankedResult,
};
use crate::store::{ActiveDocument, DocumentStore};
use ahash::AHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Embedding generation failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector search failed: {0}")]
    VectorSearch(String),

    #[error("Keyword search failed: {0}")]
    KeywordSearch(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Fuse two ranked passage lists and keep the best `k`
///
/// Passages are merged by content fingerprint; the payload kept for a merged
/// passage is the first one seen. Each returned passage carries its fused
/// score in `score`.
pub fn fuse_ranked(
    vector_hits: Vec<Passage>,
    lexical_hits: Vec<Passage>,
    k: usize,
    config: &FusionConfig,
    mode: FingerprintMode,
) -> Vec<RankedResult> {
    let mut payloads: AHashMap<Fingerprint, Passage> = AHashMap::new();

    let mut keys_of = |hits: Vec<Passage>| -> Vec<Fingerprint> {
        hits.into_iter()
            .map(|passage| {
                let key = fingerprint(&passage.text, mode);
                payloads.entry(key).or_insert(passage);
                key
            })
            .collect()
    };
    let vector_keys = keys_of(vector_hits);
    let lexical_keys = keys_of(lexical_hits);

    reciprocal_rank_fusion(&vector_keys, &lexical_keys, config)
        .into_iter()
        .take(k)
        .filter_map(|(key, fused_score)| {
            payloads.remove(&key).map(|passage| RankedResult {
                passage: Passage {
                    score: fused_score,
                    ..passage
                },
                fused_score,
            })
        })
        .collect()
}

/// Hybrid retriever over the shared active document
pub struct HybridRetriever {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    rrf_k: f32,
    fingerprint: FingerprintMode,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            rrf_k: config.rrf_k,
            fingerprint: FingerprintMode::from_config(config),
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Top `k` passages for `query`, best first
    ///
    /// An empty store, an empty query or `k == 0` yields no passages rather
    /// than an error. A query with no keyword terms still runs the semantic
    /// branch.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        vector_weight: f32,
    ) -> Result<Vec<Passage>, SearchError> {
        Ok(self
            .search_ranked(query, k, vector_weight)
            .await?
            .into_iter()
            .map(|r| r.passage)
            .collect())
    }

    /// Like `search`, keeping the fused score alongside each passage
    pub async fn search_ranked(
        &self,
        query: &str,
        k: usize,
        vector_weight: f32,
    ) -> Result<Vec<RankedResult>, SearchError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        // Pin the current document; a concurrent replace swaps the handle
        // but never mutates this one.
        let Some(doc) = self.store.current().await else {
            debug!("Search with no active document");
            return Ok(Vec::new());
        };
        if doc.vectors().is_empty() {
            return Ok(Vec::new());
        }

        let fusion = FusionConfig::new(self.rrf_k, vector_weight)
            .map_err(|e| SearchError::InvalidQuery(e.to_string()))?;

        // Nothing to embed and no terms to match
        if query.is_empty() {
            debug!("Empty query, no passages");
            return Ok(Vec::new());
        }

        let (vector_hits, lexical_hits) = tokio::join!(
            self.semantic_search(&doc, query, k, fusion.vector_weight > 0.0),
            self.keyword_search(&doc, query, k, fusion.lexical_weight > 0.0)
        );
        let vector_hits = vector_hits?;
        let lexical_hits = lexical_hits?;

        debug!(
            "Candidates: {} semantic, {} lexical",
            vector_hits.len(),
            lexical_hits.len()
        );

        let results = fuse_ranked(vector_hits, lexical_hits, k, &fusion, self.fingerprint);
        debug!("Returning {} fused passages", results.len());
        Ok(results)
    }

    /// Semantic search using the vector store
    async fn semantic_search(
        &self,
        doc: &ActiveDocument,
        query: &str,
        limit: usize,
        enabled: bool,
    ) -> Result<Vec<Passage>, SearchError> {
        if !enabled {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;

        let matches = doc
            .vectors()
            .query(&embedding, limit)
            .map_err(|e| SearchError::VectorSearch(e.to_string()))?;

        let chunks = doc.vectors().get_all();
        Ok(matches
            .into_iter()
            .filter_map(|m| {
                chunks
                    .get(m.ordinal)
                    .map(|chunk| Passage::from_chunk(chunk, m.similarity))
            })
            .collect())
    }

    /// Keyword search using the cached BM25 index
    async fn keyword_search(
        &self,
        doc: &Arc<ActiveDocument>,
        query: &str,
        limit: usize,
        enabled: bool,
    ) -> Result<Vec<Passage>, SearchError> {
        if !enabled {
            return Ok(Vec::new());
        }

        let doc = Arc::clone(doc);
        let query = query.to_string();

        // The first search after a document change builds the index
        tokio::task::spawn_blocking(move || -> Result<Vec<Passage>, SearchError> {
            let index = doc
                .keyword_index()
                .map_err(|e| SearchError::KeywordSearch(e.to_string()))?;
            let hits = index
                .search(&query, limit)
                .map_err(|e| SearchError::KeywordSearch(e.to_string()))?;

            let chunks = doc.vectors().get_all();
            Ok(hits
                .into_iter()
                .filter_map(|hit| {
                    chunks
                        .get(hit.ordinal)
                        .map(|chunk| Passage::from_chunk(chunk, hit.score))
                })
                .collect())
        })
        .await
        .map_err(|e| SearchError::KeywordSearch(format!("Keyword search task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(text: &str, page: u32, score: f32) -> Passage {
        Passage {
            text: text.to_string(),
            page: Some(page),
            source: "fridge.pdf".to_string(),
            score,
        }
    }

    #[test]
    fn test_capacity_scenario() {
        let a = passage("The capacity is 180 litres.", 2, 0.91);
        let b = passage("Shelves are adjustable.", 3, 0.55);

        let config = FusionConfig::new(60.0, 0.5).unwrap();
        let results = fuse_ranked(
            vec![a.clone(), b.clone()],
            vec![passage("The capacity is 180 litres.", 2, 5.0)],
            2,
            &config,
            FingerprintMode::Full,
        );

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].passage.page, Some(2));
        assert!((results[0].fused_score - 1.0 / 60.0).abs() < 1e-6);
        assert_eq!(results[1].passage.page, Some(3));
        assert!((results[1].fused_score - 0.5 / 61.0).abs() < 1e-6);
        assert_eq!(results[1].passage.score, results[1].fused_score);
        assert_eq!(results[1].passage.text, b.text);
    }

    #[test]
    fn test_top_k_bound_with_disjoint_lists() {
        let vector: Vec<Passage> = (0..6).map(|i| passage(&format!("v{}", i), i, 0.0)).collect();
        let lexical: Vec<Passage> = (0..6).map(|i| passage(&format!("l{}", i), i, 0.0)).collect();

        let config = FusionConfig::new(60.0, 0.5).unwrap();
        let results = fuse_ranked(vector, lexical, 6, &config, FingerprintMode::Full);
        assert_eq!(results.len(), 6);

        // Equal weights interleave by rank, vector list first
        let texts: Vec<&str> = results.iter().map(|r| r.passage.text.as_str()).collect();
        assert_eq!(texts, vec!["v0", "l0", "v1", "l1", "v2", "l2"]);
    }

    #[test]
    fn test_prefix_mode_merges_shared_prefix() {
        let head = "x".repeat(200);
        let a = passage(&format!("{} first", head), 1, 0.0);
        let b = passage(&format!("{} second", head), 2, 0.0);

        let config = FusionConfig::new(60.0, 0.5).unwrap();
        let full = fuse_ranked(
            vec![a.clone()],
            vec![b.clone()],
            5,
            &config,
            FingerprintMode::Full,
        );
        assert_eq!(full.len(), 2);

        let prefix = fuse_ranked(vec![a], vec![b], 5, &config, FingerprintMode::Prefix(200));
        assert_eq!(prefix.len(), 1);
        assert_eq!(prefix[0].passage.page, Some(1));
    }

    #[test]
    fn test_empty_inputs() {
        let config = FusionConfig::new(60.0, 0.5).unwrap();
        assert!(fuse_ranked(vec![], vec![], 6, &config, FingerprintMode::Full).is_empty());
    }
}
