//! Query-time retrieval fusion, answer-mode selection and synthesis.

pub mod fusion;
pub mod mode;
pub mod synthesis;
pub mod types;

pub use fusion::{fuse, FusedCandidate, FusionOutcome, FusionParams, SourceHit};
pub use mode::{confidence, select_mode, RetrievalMetrics};
pub use synthesis::{build_context, AnswerSynthesizer};
pub use types::{AnswerEnvelope, AnswerMode, AnswerTiming, CitedChunk, SearchResult};
