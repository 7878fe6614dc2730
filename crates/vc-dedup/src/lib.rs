//! Semantic deduplication of discovered issues.
//!
//! An [`AiDeduplicator`] compares candidate issues against the persistent
//! store (cross-batch) and against earlier candidates in the same batch
//! (within-batch) using an external AI judge. The judge is treated as
//! unreliable: every judge or store failure degrades to "not a duplicate" so
//! work is filed rather than lost.

pub mod config;
pub mod dedup;
pub mod judge;

pub use config::{ConfigError, DeduplicatorConfig};
pub use dedup::{
    AiDeduplicator, DedupError, DedupStats, DeduplicationResult, DuplicateDecision,
};
pub use judge::{AnthropicJudge, BatchResponse, DuplicateJudge, JudgeError, JudgeVerdict};
