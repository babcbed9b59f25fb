//! Hybrid Retrieval
//!
//! Combines semantic (vector) and lexical (BM25) search over the active
//! document with weighted Reciprocal Rank Fusion.

mod fingerprint;
mod fusion;
mod hybrid;

pub use fingerprint::{fingerprint, Fingerprint, FingerprintMode};
pub use fusion::{reciprocal_rank_fusion, FusionConfig, FusionError};
pub use hybrid::{fuse_ranked, HybridRetriever, SearchError};

use crate::store::StoredChunk;
use serde::{Deserialize, Serialize};

/// A retrieved chunk of the active document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub page: Option<u32>,
    pub source: String,
    /// Score from whichever stage produced this passage
    pub score: f32,
}

impl Passage {
    pub fn from_chunk(chunk: &StoredChunk, score: f32) -> Self {
        Self {
            text: chunk.text.clone(),
            page: chunk.metadata.page,
            source: chunk.metadata.source.clone(),
            score,
        }
    }
}

/// A passage with its fused score, alive only during one search
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub passage: Passage,
    pub fused_score: f32,
}
