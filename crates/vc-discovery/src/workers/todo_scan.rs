use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use vc_core::cancel::CancelToken;
use vc_core::context::CodebaseContext;
use vc_core::issue::DiscoveredIssue;

use crate::worker::{CostEstimate, DiscoveryWorker, WorkerError, WorkerResult};

use super::{relative_path, source_files};

/// Deferred-work markers recognised in source comments.
const MARKERS: &[&str] = &["TODO", "FIXME", "HACK", "XXX"];

/// Cap on filed marker issues per run; the remainder is summarised in the
/// result context instead of flooding the store.
const MAX_ISSUES: usize = 50;

/// Scans source comments for deferred-work markers.
pub struct TodoScanWorker;

impl TodoScanWorker {
    pub fn new() -> Self {
        Self
    }

    fn classify(marker: &str) -> (&'static str, u8) {
        match marker {
            "FIXME" => ("bug", 2),
            "TODO" => ("task", 3),
            _ => ("chore", 3),
        }
    }
}

impl Default for TodoScanWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryWorker for TodoScanWorker {
    fn name(&self) -> &str {
        "todo-scan"
    }

    fn philosophy(&self) -> &str {
        "Deferred work that is already written down is work the team agreed matters; \
         surface it before it fossilises."
    }

    fn scope(&self) -> &str {
        "TODO/FIXME/HACK/XXX markers in source comments"
    }

    fn cost(&self) -> CostEstimate {
        CostEstimate::cheap()
    }

    async fn analyze(
        &self,
        cancel: &CancelToken,
        ctx: &CodebaseContext,
    ) -> Result<WorkerResult, WorkerError> {
        let started = Instant::now();
        let mut result = WorkerResult::new();
        let mut markers_seen = 0usize;

        for path in source_files(ctx) {
            if cancel.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(_) => {
                    result.stats.errors_ignored += 1;
                    continue;
                }
            };
            result.stats.files_analyzed += 1;
            let rel = relative_path(ctx, &path);

            for (line_idx, line) in text.lines().enumerate() {
                let Some(marker) = MARKERS.iter().find(|m| line.contains(*m)) else {
                    continue;
                };
                markers_seen += 1;
                if result.issues_discovered.len() >= MAX_ISSUES {
                    continue;
                }

                let line_no = (line_idx + 1) as u32;
                let (issue_type, priority) = Self::classify(marker);
                let mut issue = DiscoveredIssue::new(
                    format!("Resolve {marker} in {rel}:{line_no}"),
                    format!("Line {line_no} of {rel} carries a {marker} marker: {}", line.trim()),
                )
                .at_location(rel.clone(), line_no, None);
                issue.category = "tech-debt".to_string();
                issue.issue_type = issue_type.to_string();
                issue.priority = priority;
                issue.confidence = 0.85;
                issue.discovered_by = self.name().to_string();
                issue.add_tag("deferred-work");
                issue.evidence.insert("marker", *marker);
                issue.evidence.insert("line_text", line.trim());
                result.issues_discovered.push(issue);
            }
        }

        result.stats.patterns_found = markers_seen;
        result.stats.issues_found = result.issues_discovered.len();
        result.stats.duration_ms = started.elapsed().as_millis() as u64;
        result.stats.estimated_cost = 0.0;
        result.context = format!(
            "{} deferred-work markers across {} files",
            markers_seen, result.stats.files_analyzed
        );
        result.reasoning = "markers collected verbatim; no judgment applied".to_string();
        debug!(markers = markers_seen, files = result.stats.files_analyzed, "todo scan complete");
        Ok(result)
    }
}
