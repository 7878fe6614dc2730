use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use vc_core::cancel::CancelToken;
use vc_core::context::{CodebaseContext, ContextBuilder, ContextError};
use vc_core::issue::DiscoveredIssue;
use vc_core::store::{Issue, IssueStatus, IssueStore, IssueType};

use vc_dedup::dedup::{AiDeduplicator, DedupError};

use crate::budget::{preset, DiscoveryBudget, RunningTotals};
use crate::registry::{RegistryError, WorkerRegistry};
use crate::worker::{WorkerError, WorkerResult};

/// Actor name recorded on every issue the pipeline files.
const FILING_ACTOR: &str = "discovery";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("context build failed: {0}")]
    Context(#[from] ContextError),
    #[error("worker resolution failed: {0}")]
    Registry(#[from] RegistryError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("discovery run cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for one discovery run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Preset supplying the default worker list and budget.
    pub preset: String,
    /// Explicit worker list; overrides the preset's list when set.
    pub workers: Option<Vec<String>>,
    /// Budget override; defaults to the preset's budget.
    pub budget: Option<DiscoveryBudget>,
    /// File unique issues into the store after deduplication.
    pub auto_file: bool,
    /// Labels attached to every filed issue.
    pub default_labels: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            preset: "standard".to_string(),
            workers: None,
            budget: None,
            auto_file: true,
            default_labels: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    pub workers_run: usize,
    pub total_issues_discovered: usize,
    pub unique_issues: usize,
    pub duplicate_issues: usize,
    pub within_batch_duplicates: usize,
    pub total_ai_calls: u64,
    pub total_cost_usd: f64,
    pub total_files_analyzed: usize,
    pub errors_ignored: usize,
    pub total_duration_ms: u64,
}

/// Everything a discovery run produced. Callers inspect this record rather
/// than parsing error strings: per-worker failures, the budget flag, and the
/// filed ids are all first-class fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRunResult {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub context: CodebaseContext,
    pub worker_results: BTreeMap<String, WorkerResult>,
    pub unique_issues: Vec<DiscoveredIssue>,
    /// Candidate index -> existing issue id.
    pub duplicate_pairs: BTreeMap<usize, String>,
    /// Duplicate candidate index -> earlier original index.
    pub within_batch_duplicates: BTreeMap<usize, usize>,
    pub filed_ids: Vec<String>,
    /// Non-fatal failures keyed by worker name (plus `filing` / `dedup`).
    pub errors: BTreeMap<String, String>,
    pub budget_exceeded: bool,
    pub budget_exceeded_reason: Option<String>,
    pub stats: DiscoveryStats,
}

// ---------------------------------------------------------------------------
// DiscoveryOrchestrator
// ---------------------------------------------------------------------------

/// Drives the full discovery pipeline: context build, worker resolution,
/// budget-checked sequential execution, deduplication, and filing.
///
/// Workers run sequentially in the resolved topological order so budget
/// accounting stays accurate before each step. A failing worker never aborts
/// the run; its error is captured and iteration continues.
pub struct DiscoveryOrchestrator {
    registry: WorkerRegistry,
    store: Option<Arc<dyn IssueStore>>,
    deduplicator: Option<Arc<AiDeduplicator>>,
    config: OrchestratorConfig,
}

impl DiscoveryOrchestrator {
    pub fn new(
        registry: WorkerRegistry,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        if config.workers.is_none() && preset(&config.preset).is_none() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "unknown preset `{}` and no explicit worker list",
                config.preset
            )));
        }
        Ok(Self {
            registry,
            store: None,
            deduplicator: None,
            config,
        })
    }

    /// Attach the issue store used for filing.
    pub fn with_store(mut self, store: Arc<dyn IssueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach the deduplicator. Without one, every discovered issue is
    /// treated as unique.
    pub fn with_deduplicator(mut self, deduplicator: Arc<AiDeduplicator>) -> Self {
        self.deduplicator = Some(deduplicator);
        self
    }

    pub async fn run(
        &self,
        cancel: &CancelToken,
        root: impl AsRef<Path>,
    ) -> Result<DiscoveryRunResult, OrchestratorError> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let context = match ContextBuilder::new(root.as_ref()).build(cancel) {
            Ok(ctx) => ctx,
            Err(ContextError::Cancelled) => return Err(OrchestratorError::Cancelled),
            Err(err) => return Err(err.into()),
        };
        info!(
            root = %context.root.display(),
            files = context.total_files,
            "discovery run starting"
        );

        // Explicit worker list overrides the preset's. Resolution failure is
        // fatal.
        let workers = match &self.config.workers {
            Some(names) => self.registry.resolve_workers(names)?,
            None => self.registry.get_preset_workers(&self.config.preset)?,
        };
        let budget = self
            .config
            .budget
            .clone()
            .or_else(|| preset(&self.config.preset).map(|p| p.budget))
            .unwrap_or_default();

        let mut result = DiscoveryRunResult {
            started_at,
            completed_at: started_at,
            context: context.clone(),
            worker_results: BTreeMap::new(),
            unique_issues: Vec::new(),
            duplicate_pairs: BTreeMap::new(),
            within_batch_duplicates: BTreeMap::new(),
            filed_ids: Vec::new(),
            errors: BTreeMap::new(),
            budget_exceeded: false,
            budget_exceeded_reason: None,
            stats: DiscoveryStats::default(),
        };

        // Sequential execution with a budget check before every worker.
        let mut totals = RunningTotals::default();
        let mut collected: Vec<DiscoveredIssue> = Vec::new();

        for worker in &workers {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            if let Some(reason) = budget.check(&totals, clock.elapsed()) {
                warn!(reason = %reason, "discovery budget exceeded; stopping further workers");
                result.budget_exceeded = true;
                result.budget_exceeded_reason = Some(reason);
                break;
            }

            let name = worker.name().to_string();
            info!(worker = %name, "running discovery worker");
            match worker.analyze(cancel, &context).await {
                Ok(worker_result) => {
                    totals.cost_usd += worker_result.stats.estimated_cost;
                    totals.ai_calls += worker_result.stats.ai_calls_made;
                    totals.issues_discovered += worker_result.issues_discovered.len();

                    result.stats.workers_run += 1;
                    result.stats.total_ai_calls += u64::from(worker_result.stats.ai_calls_made);
                    result.stats.total_cost_usd += worker_result.stats.estimated_cost;
                    result.stats.total_files_analyzed += worker_result.stats.files_analyzed;
                    result.stats.errors_ignored += worker_result.stats.errors_ignored;

                    collected.extend(worker_result.issues_discovered.iter().cloned());
                    result.worker_results.insert(name, worker_result);
                }
                Err(WorkerError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(err) => {
                    warn!(worker = %name, error = %err, "worker failed; continuing");
                    result.errors.insert(name, err.to_string());
                }
            }
        }
        result.stats.total_issues_discovered = collected.len();

        // Deduplicate; absent a deduplicator all issues are unique. Dedup
        // failures never block filing.
        match &self.deduplicator {
            Some(dedup) => match dedup.deduplicate_batch(cancel, &collected).await {
                Ok(dedup_result) => {
                    result.stats.total_ai_calls += dedup_result.stats.ai_calls as u64;
                    result.unique_issues = dedup_result.unique_issues;
                    result.duplicate_pairs = dedup_result.duplicate_pairs;
                    result.within_batch_duplicates = dedup_result.within_batch_duplicates;
                }
                Err(DedupError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(err) => {
                    warn!(error = %err, "deduplication failed; filing all issues as unique");
                    result.errors.insert("dedup".to_string(), err.to_string());
                    result.unique_issues = collected;
                }
            },
            None => result.unique_issues = collected,
        }
        result.stats.unique_issues = result.unique_issues.len();
        result.stats.duplicate_issues = result.duplicate_pairs.len();
        result.stats.within_batch_duplicates = result.within_batch_duplicates.len();

        // File the survivors.
        if self.config.auto_file {
            if let Some(store) = &self.store {
                let survivors = result.unique_issues.clone();
                self.file_issues(cancel, store, &survivors, &mut result)
                    .await?;
            }
        }

        result.completed_at = Utc::now();
        result.stats.total_duration_ms = clock.elapsed().as_millis() as u64;
        info!(
            unique = result.stats.unique_issues,
            duplicates = result.stats.duplicate_issues,
            filed = result.filed_ids.len(),
            budget_exceeded = result.budget_exceeded,
            "discovery run complete"
        );
        Ok(result)
    }

    /// File each unique issue, attaching default and provenance labels.
    /// Label failures are per-issue non-fatal; a create failure ends the
    /// loop with the ids already filed.
    async fn file_issues(
        &self,
        cancel: &CancelToken,
        store: &Arc<dyn IssueStore>,
        survivors: &[DiscoveredIssue],
        result: &mut DiscoveryRunResult,
    ) -> Result<(), OrchestratorError> {
        for discovered in survivors {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let record = to_store_issue(discovered);
            let id = match store.create_issue(&record, FILING_ACTOR).await {
                Ok(id) => id,
                Err(err) => {
                    warn!(error = %err, "issue creation failed; stopping filing");
                    result.errors.insert("filing".to_string(), err.to_string());
                    break;
                }
            };

            let mut labels = self.config.default_labels.clone();
            labels.push(format!("discovered-by:{}", discovered.discovered_by));
            if !discovered.category.is_empty() {
                labels.push(format!("category:{}", discovered.category));
            }
            for label in labels {
                if let Err(err) = store.add_label(&id, &label, FILING_ACTOR).await {
                    warn!(issue = %id, label = %label, error = %err, "label attach failed");
                }
            }

            result.filed_ids.push(id);
        }
        Ok(())
    }
}

/// Convert a discovered issue into a store record. Unknown type strings
/// default to `task`.
fn to_store_issue(discovered: &DiscoveredIssue) -> Issue {
    let now = Utc::now();
    Issue {
        id: String::new(),
        title: discovered.title.clone(),
        description: discovered.description.clone(),
        category: if discovered.category.is_empty() {
            None
        } else {
            Some(discovered.category.clone())
        },
        issue_type: IssueType::parse_lossy(&discovered.issue_type),
        priority: discovered.priority,
        status: IssueStatus::Open,
        labels: Vec::new(),
        dependencies: Vec::new(),
        created_at: now,
        updated_at: now,
        closed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_preset_without_workers_rejected() {
        let err = DiscoveryOrchestrator::new(
            WorkerRegistry::new(),
            OrchestratorConfig {
                preset: "galactic".to_string(),
                ..OrchestratorConfig::default()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
    }

    #[test]
    fn explicit_workers_allow_unknown_preset() {
        let orchestrator = DiscoveryOrchestrator::new(
            WorkerRegistry::new(),
            OrchestratorConfig {
                preset: "galactic".to_string(),
                workers: Some(vec!["a".to_string()]),
                ..OrchestratorConfig::default()
            },
        );
        assert!(orchestrator.is_ok());
    }

    #[test]
    fn type_conversion_defaults_unknown_to_task() {
        let mut discovered = DiscoveredIssue::new("Some finding worth filing", "desc");
        discovered.discovered_by = "stub".to_string();
        discovered.issue_type = "improvement".to_string();
        let record = to_store_issue(&discovered);
        assert_eq!(record.issue_type, IssueType::Task);
        assert_eq!(record.status, IssueStatus::Open);

        discovered.issue_type = "bug".to_string();
        assert_eq!(to_store_issue(&discovered).issue_type, IssueType::Bug);
    }

    #[test]
    fn empty_category_becomes_none() {
        let mut discovered = DiscoveredIssue::new("Another finding here", "desc");
        discovered.discovered_by = "stub".to_string();
        assert!(to_store_issue(&discovered).category.is_none());
        discovered.category = "docs".to_string();
        assert_eq!(to_store_issue(&discovered).category.as_deref(), Some("docs"));
    }
}
