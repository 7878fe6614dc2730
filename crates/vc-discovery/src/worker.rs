use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vc_core::cancel::CancelToken;
use vc_core::context::CodebaseContext;
use vc_core::issue::DiscoveredIssue;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("analysis failed: {0}")]
    Analysis(String),
    #[error("worker cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Cost estimation
// ---------------------------------------------------------------------------

/// Broad cost bucket; aggregates take the maximum under
/// `Cheap < Moderate < Expensive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Cheap,
    Moderate,
    Expensive,
}

/// A worker's declared cost. Dollar and AI-call estimates sum across
/// workers; the category is the max of the constituents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub category: CostCategory,
    pub est_usd: f64,
    pub est_ai_calls: u32,
}

impl CostEstimate {
    pub fn cheap() -> Self {
        Self {
            category: CostCategory::Cheap,
            est_usd: 0.01,
            est_ai_calls: 0,
        }
    }

    pub fn moderate() -> Self {
        Self {
            category: CostCategory::Moderate,
            est_usd: 0.25,
            est_ai_calls: 5,
        }
    }

    pub fn expensive() -> Self {
        Self {
            category: CostCategory::Expensive,
            est_usd: 2.0,
            est_ai_calls: 50,
        }
    }

    /// Fold another estimate into this one.
    pub fn combine(&mut self, other: &CostEstimate) {
        self.category = self.category.max(other.category);
        self.est_usd += other.est_usd;
        self.est_ai_calls += other.est_ai_calls;
    }
}

// ---------------------------------------------------------------------------
// WorkerStats / WorkerResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub files_analyzed: usize,
    pub issues_found: usize,
    pub duration_ms: u64,
    pub ai_calls_made: u32,
    pub tokens_used: u64,
    pub estimated_cost: f64,
    /// Malformed inputs tolerated and skipped.
    pub errors_ignored: usize,
    pub patterns_found: usize,
}

impl WorkerStats {
    /// Accumulate another worker's stats into a running total.
    pub fn merge(&mut self, other: &WorkerStats) {
        self.files_analyzed += other.files_analyzed;
        self.issues_found += other.issues_found;
        self.duration_ms += other.duration_ms;
        self.ai_calls_made += other.ai_calls_made;
        self.tokens_used += other.tokens_used;
        self.estimated_cost += other.estimated_cost;
        self.errors_ignored += other.errors_ignored;
        self.patterns_found += other.patterns_found;
    }
}

/// Everything a worker hands back from one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub issues_discovered: Vec<DiscoveredIssue>,
    /// Free-form context string surfaced to the AI assessment step.
    pub context: String,
    pub reasoning: String,
    pub analyzed_at: DateTime<Utc>,
    pub stats: WorkerStats,
}

impl WorkerResult {
    pub fn new() -> Self {
        Self {
            issues_discovered: Vec::new(),
            context: String::new(),
            reasoning: String::new(),
            analyzed_at: Utc::now(),
            stats: WorkerStats::default(),
        }
    }
}

impl Default for WorkerResult {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// DiscoveryWorker trait
// ---------------------------------------------------------------------------

/// Capability interface for discovery workers.
///
/// Workers collect structural facts, never render verdicts; judgment is left
/// to the AI step downstream. They tolerate malformed source files (counting
/// them as `errors_ignored`), skip test and generated files, and must not
/// mutate the shared [`CodebaseContext`]. A worker may emit zero issues.
///
/// YAML-defined and plugin workers conform to this same interface; the
/// registry dispatches by name lookup, never by type.
#[async_trait]
pub trait DiscoveryWorker: Send + Sync {
    /// Unique, immutable identifier.
    fn name(&self) -> &str;

    /// Guiding principle, surfaced to AI assessment.
    fn philosophy(&self) -> &str;

    /// What the worker looks at.
    fn scope(&self) -> &str;

    fn cost(&self) -> CostEstimate;

    /// Names of workers that must run before this one. Dependencies on
    /// workers outside the requested set are ignored at resolve time.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    async fn analyze(
        &self,
        cancel: &CancelToken,
        ctx: &CodebaseContext,
    ) -> Result<WorkerResult, WorkerError>;
}

impl std::fmt::Debug for dyn DiscoveryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryWorker")
            .field("name", &self.name())
            .finish()
    }
}
