//! Retrieval quality metrics and answer-mode selection.
//!
//! Selection is a pure function of [`RetrievalMetrics`]. The metrics carry
//! the thresholds they were evaluated against, so a logged snapshot is
//! enough to re-derive the mode.

use crate::rag::fusion::FusionOutcome;
use crate::rag::types::AnswerMode;
use crate::types::RankedHit;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetrics {
    /// Highest raw similarity across every candidate from either backend
    pub max_similarity: f32,
    /// Distinct candidates that cleared `min_similarity`
    pub retained_count: usize,
    /// Mean best similarity of the cited candidates
    pub mean_similarity: f32,
    /// Distinct candidates across both backends
    pub candidate_count: usize,
    pub local_hits: usize,
    pub cloud_hits: usize,
    pub local_failed: bool,
    pub cloud_failed: bool,
    pub min_similarity: f32,
    pub high_threshold: f32,
}

impl RetrievalMetrics {
    pub fn compute(
        local: &[RankedHit],
        cloud: &[RankedHit],
        outcome: &FusionOutcome,
        min_similarity: f32,
        high_threshold: f32,
    ) -> Self {
        let max_similarity = local
            .iter()
            .chain(cloud.iter())
            .map(|hit| hit.score)
            .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |m| m.max(s))))
            .unwrap_or(0.0);

        let mean_similarity = if outcome.candidates.is_empty() {
            0.0
        } else {
            outcome
                .candidates
                .iter()
                .map(|c| c.best_similarity)
                .sum::<f32>()
                / outcome.candidates.len() as f32
        };

        Self {
            max_similarity,
            retained_count: outcome.cleared,
            mean_similarity,
            candidate_count: outcome.distinct,
            local_hits: local.len(),
            cloud_hits: cloud.len(),
            local_failed: false,
            cloud_failed: false,
            min_similarity,
            high_threshold,
        }
    }
}

/// Classify retrieval quality into an answer mode.
pub fn select_mode(metrics: &RetrievalMetrics) -> AnswerMode {
    if metrics.retained_count == 0 {
        AnswerMode::Knowledge
    } else if metrics.max_similarity >= metrics.high_threshold {
        AnswerMode::Rag
    } else {
        AnswerMode::Hybrid
    }
}

/// Confidence reported with an answer of the given mode.
pub fn confidence(mode: AnswerMode, metrics: &RetrievalMetrics, knowledge_confidence: f32) -> f32 {
    match mode {
        AnswerMode::Rag | AnswerMode::Hybrid => metrics.max_similarity.clamp(0.0, 1.0),
        AnswerMode::Knowledge => knowledge_confidence,
        AnswerMode::Error => 0.0,
    }
}
