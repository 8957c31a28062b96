//! Weighted Reciprocal Rank Fusion (RRF) for combining backend rankings.

use std::collections::{HashMap, HashSet};

use hyrag_core::{Backend, DocId, FusedHit, RankedHit, RetrievalConfig};

/// Weights and rank constant for fusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub sparse_weight: f64,
    pub dense_weight: f64,

    /// Higher values flatten the difference between top and lower ranks.
    pub rank_constant: u32,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            sparse_weight: 0.3,
            dense_weight: 0.7,
            rank_constant: 60,
        }
    }
}

impl From<&RetrievalConfig> for FusionParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            sparse_weight: config.sparse_weight,
            dense_weight: config.dense_weight,
            rank_constant: config.rank_constant,
        }
    }
}

impl FusionParams {
    fn weight(&self, backend: Backend) -> f64 {
        match backend {
            Backend::Sparse => self.sparse_weight,
            Backend::Dense => self.dense_weight,
        }
    }
}

/// Fuse the sparse and dense rankings.
///
/// A document at 1-based rank `r` in a list contributes
/// `weight / (rank_constant + r)`; contributions are summed per document.
/// Only the first occurrence of an id within a list counts. The result
/// holds every document that appears in either list, sorted by fused score
/// descending and then by id ascending.
pub fn reciprocal_rank_fusion(
    sparse: &[RankedHit],
    dense: &[RankedHit],
    params: &FusionParams,
) -> Vec<FusedHit> {
    let mut fused: HashMap<DocId, FusedHit> = HashMap::new();

    for (backend, list) in [(Backend::Sparse, sparse), (Backend::Dense, dense)] {
        let weight = params.weight(backend);
        let mut seen: HashSet<&DocId> = HashSet::new();

        for (i, hit) in list.iter().enumerate() {
            if !seen.insert(&hit.doc_id) {
                continue;
            }

            let rank = i as u32 + 1;
            let entry = fused.entry(hit.doc_id.clone()).or_insert_with(|| FusedHit {
                doc_id: hit.doc_id.clone(),
                fused_score: 0.0,
                sparse_rank: None,
                dense_rank: None,
            });

            entry.fused_score += weight / (params.rank_constant as f64 + rank as f64);
            match backend {
                Backend::Sparse => entry.sparse_rank = Some(rank),
                Backend::Dense => entry.dense_rank = Some(rank),
            }
        }
    }

    let mut fused: Vec<FusedHit> = fused.into_values().collect();
    sort_fused(&mut fused);
    fused
}

/// Order by fused score descending, then id ascending.
pub fn sort_fused(hits: &mut [FusedHit]) {
    hits.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
}
