//! Reciprocal Rank Fusion algorithm for combining search results

use ahash::AHashMap;
use std::hash::Hash;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FusionError {
    #[error("Invalid vector weight {0}: must be within [0, 1]")]
    InvalidWeight(f32),

    #[error("Invalid RRF constant {0}: must be non-negative")]
    InvalidRrfK(f32),
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f32,

    /// Weight for semantic results
    pub vector_weight: f32,

    /// Weight for keyword results, always `1 - vector_weight`
    pub lexical_weight: f32,
}

impl FusionConfig {
    pub fn new(rrf_k: f32, vector_weight: f32) -> Result<Self, FusionError> {
        if !(0.0..=1.0).contains(&vector_weight) {
            return Err(FusionError::InvalidWeight(vector_weight));
        }
        if rrf_k.is_nan() || rrf_k < 0.0 {
            return Err(FusionError::InvalidRrfK(rrf_k));
        }

        Ok(Self {
            rrf_k,
            vector_weight,
            lexical_weight: 1.0 - vector_weight,
        })
    }
}

/// Apply Reciprocal Rank Fusion to combine two ranked lists
///
/// RRF formula: score(key) = sum over lists of: weight / (rrf_k + rank),
/// with zero-based ranks. A key appearing in both lists (or twice in one)
/// accumulates every contribution. A list whose weight is zero contributes
/// no candidates at all.
///
/// # Returns
/// `(key, fused_score)` pairs sorted by score descending; equal scores keep
/// first-seen order (vector list before lexical list)
pub fn reciprocal_rank_fusion<K>(vector: &[K], lexical: &[K], config: &FusionConfig) -> Vec<(K, f32)>
where
    K: Hash + Eq + Clone,
{
    let mut positions: AHashMap<K, usize> = AHashMap::new();
    let mut fused: Vec<(K, f32)> = Vec::new();

    for (list, weight) in [(vector, config.vector_weight), (lexical, config.lexical_weight)] {
        if weight <= 0.0 {
            continue;
        }

        for (rank, key) in list.iter().enumerate() {
            let contribution = weight / (config.rrf_k + rank as f32);
            match positions.get(key) {
                Some(&pos) => fused[pos].1 += contribution,
                None => {
                    positions.insert(key.clone(), fused.len());
                    fused.push((key.clone(), contribution));
                }
            }
        }
    }

    // sort_by is stable, so ties stay in first-seen order
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_rrf_basic() {
        let semantic = vec![1, 2, 3];
        let keyword = vec![2, 1, 4];

        let config = FusionConfig::new(60.0, 0.5).unwrap();
        let fused = reciprocal_rank_fusion(&semantic, &keyword, &config);

        assert_eq!(fused.len(), 4);
        // 1 and 2 appear in both lists with mirrored ranks
        assert!(approx(fused[0].1, fused[1].1));
        assert_eq!(fused[0].0, 1);
        assert_eq!(fused[1].0, 2);
        assert!(approx(fused[0].1, 0.5 / 60.0 + 0.5 / 61.0));
        assert_eq!(fused[2].0, 3);
        assert_eq!(fused[3].0, 4);
    }

    #[test]
    fn test_rrf_weighted() {
        let config = FusionConfig::new(60.0, 0.7).unwrap();
        let fused = reciprocal_rank_fusion(&["a"], &["b"], &config);

        assert_eq!(fused[0].0, "a");
        assert!(approx(fused[1].1, 0.3 / 60.0));
    }

    #[test]
    fn test_pure_vector_and_pure_lexical() {
        let vector = vec!["v1", "v2", "shared"];
        let lexical = vec!["shared", "l1"];

        let config = FusionConfig::new(60.0, 1.0).unwrap();
        let keys: Vec<_> = reciprocal_rank_fusion(&vector, &lexical, &config)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vector);

        let config = FusionConfig::new(60.0, 0.0).unwrap();
        let keys: Vec<_> = reciprocal_rank_fusion(&vector, &lexical, &config)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, lexical);
    }

    #[test]
    fn test_deterministic() {
        let vector: Vec<u32> = (0..20).collect();
        let lexical: Vec<u32> = (10..30).rev().collect();
        let config = FusionConfig::new(60.0, 0.4).unwrap();

        let first = reciprocal_rank_fusion(&vector, &lexical, &config);
        let second = reciprocal_rank_fusion(&vector, &lexical, &config);
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicates_within_a_list_accumulate() {
        let config = FusionConfig::new(60.0, 1.0).unwrap();
        let fused = reciprocal_rank_fusion(&["x", "y", "x"], &[], &config);
        assert_eq!(fused[0].0, "x");
        assert!(approx(fused[0].1, 1.0 / 60.0 + 1.0 / 62.0));
    }

    #[test]
    fn test_invalid_config() {
        assert_eq!(
            FusionConfig::new(60.0, 1.5),
            Err(FusionError::InvalidWeight(1.5))
        );
        assert!(FusionConfig::new(60.0, f32::NAN).is_err());
        assert_eq!(FusionConfig::new(-1.0, 0.5), Err(FusionError::InvalidRrfK(-1.0)));

        let config = FusionConfig::new(60.0, 0.25).unwrap();
        assert!(approx(config.lexical_weight, 0.75));
    }
}
