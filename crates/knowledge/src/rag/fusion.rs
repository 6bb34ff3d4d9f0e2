//! Source-weighted Reciprocal Rank Fusion.
//!
//! `fused = w_local / (k + rank_local) + w_cloud / (k + rank_cloud)`, with
//! 1-based ranks. A source that did not return a chunk contributes nothing
//! for it. Candidates whose best raw similarity in either source is below
//! the minimum are dropped, whatever their fused score.

use crate::config::RagConfig;
use crate::types::RankedHit;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameters of one fusion pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub local_weight: f64,
    pub cloud_weight: f64,
    pub rrf_k: u32,
    pub min_similarity: f32,
    pub max_results: usize,
}

impl FusionParams {
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            local_weight: config.local_weight as f64,
            cloud_weight: config.cloud_weight as f64,
            rrf_k: config.rrf_k,
            min_similarity: config.min_similarity,
            max_results: config.max_results,
        }
    }

    /// Same parameters with the two source weights exchanged.
    pub fn swapped(&self) -> Self {
        Self {
            local_weight: self.cloud_weight,
            cloud_weight: self.local_weight,
            ..*self
        }
    }
}

/// Where a candidate appeared in one source's list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceHit {
    /// 1-based
    pub rank: usize,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedCandidate {
    pub chunk_id: String,
    pub fused_score: f64,
    pub best_similarity: f32,
    pub local: Option<SourceHit>,
    pub cloud: Option<SourceHit>,
}

/// Fused list plus what was filtered out on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionOutcome {
    /// Ranked, filtered and truncated to `max_results`
    pub candidates: Vec<FusedCandidate>,
    /// Distinct chunks seen across both sources
    pub distinct: usize,
    /// Distinct chunks that cleared the similarity floor, before truncation
    pub cleared: usize,
}

fn rrf_term(weight: f64, k: u32, rank: usize) -> f64 {
    weight / (k as f64 + rank as f64)
}

/// Index a source list by chunk id; the first occurrence of an id wins.
fn ranks(hits: &[RankedHit]) -> BTreeMap<&str, SourceHit> {
    let mut out = BTreeMap::new();
    for (i, hit) in hits.iter().enumerate() {
        out.entry(hit.chunk_id.as_str()).or_insert(SourceHit {
            rank: i + 1,
            score: hit.score,
        });
    }
    out
}

/// Merge two ranked lists into one.
pub fn fuse(local: &[RankedHit], cloud: &[RankedHit], params: &FusionParams) -> FusionOutcome {
    let local_ranks = ranks(local);
    let cloud_ranks = ranks(cloud);

    let mut ids: Vec<&str> = local_ranks.keys().chain(cloud_ranks.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();
    let distinct = ids.len();

    let mut candidates: Vec<FusedCandidate> = ids
        .into_iter()
        .map(|id| {
            let local = local_ranks.get(id).copied();
            let cloud = cloud_ranks.get(id).copied();

            let mut fused_score = 0.0;
            if let Some(hit) = local {
                fused_score += rrf_term(params.local_weight, params.rrf_k, hit.rank);
            }
            if let Some(hit) = cloud {
                fused_score += rrf_term(params.cloud_weight, params.rrf_k, hit.rank);
            }

            let best_similarity = local
                .iter()
                .chain(cloud.iter())
                .map(|hit| hit.score)
                .fold(f32::NEG_INFINITY, f32::max);

            FusedCandidate {
                chunk_id: id.to_string(),
                fused_score,
                best_similarity,
                local,
                cloud,
            }
        })
        .filter(|candidate| candidate.best_similarity >= params.min_similarity)
        .collect();

    let cleared = candidates.len();

    candidates.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| b.best_similarity.total_cmp(&a.best_similarity))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(params.max_results);

    tracing::debug!(
        local = local.len(),
        cloud = cloud.len(),
        distinct,
        cleared,
        kept = candidates.len(),
        "Fused rankings"
    );

    FusionOutcome {
        candidates,
        distinct,
        cleared,
    }
}
