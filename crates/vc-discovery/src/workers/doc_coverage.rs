use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use vc_core::cancel::CancelToken;
use vc_core::context::CodebaseContext;
use vc_core::issue::DiscoveredIssue;

use crate::worker::{CostEstimate, DiscoveryWorker, WorkerError, WorkerResult};

use super::{relative_path, source_files};

/// Project documents checked at the repository root, with the confidence and
/// priority of the issue filed when one is absent.
const EXPECTED_DOCS: &[(&str, u8)] = &[("README", 2), ("LICENSE", 3), ("CONTRIBUTING", 4)];

/// Reports objectively missing project documents and large source files that
/// carry no commentary at all.
///
/// Runs after `code-structure` so its size findings land next to the
/// structural ones in assessment context.
pub struct DocCoverageWorker;

impl DocCoverageWorker {
    pub fn new() -> Self {
        Self
    }

    fn comment_lines(text: &str) -> usize {
        text.lines()
            .map(str::trim_start)
            .filter(|line| {
                line.starts_with("//")
                    || line.starts_with('#')
                    || line.starts_with("/*")
                    || line.starts_with('*')
            })
            .count()
    }
}

impl Default for DocCoverageWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryWorker for DocCoverageWorker {
    fn name(&self) -> &str {
        "doc-coverage"
    }

    fn philosophy(&self) -> &str {
        "A repository a newcomer cannot orient themselves in loses contributors \
         silently; missing documents are the cheapest gaps to close."
    }

    fn scope(&self) -> &str {
        "root project documents and commentary in large source files"
    }

    fn cost(&self) -> CostEstimate {
        CostEstimate::moderate()
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["code-structure".to_string()]
    }

    async fn analyze(
        &self,
        cancel: &CancelToken,
        ctx: &CodebaseContext,
    ) -> Result<WorkerResult, WorkerError> {
        let started = Instant::now();
        let mut result = WorkerResult::new();

        // Root document presence: objective absences, confidence 1.0.
        let mut root_names: Vec<String> = Vec::new();
        match std::fs::read_dir(&ctx.root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    root_names.push(entry.file_name().to_string_lossy().to_ascii_uppercase());
                }
            }
            Err(_) => result.stats.errors_ignored += 1,
        }

        for (doc, priority) in EXPECTED_DOCS {
            if cancel.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
            let present = root_names.iter().any(|name| name.starts_with(doc));
            if present {
                continue;
            }
            result.stats.patterns_found += 1;
            let mut issue = DiscoveredIssue::new(
                format!("Repository has no {doc} document"),
                format!("No file matching {doc}* exists at the repository root."),
            );
            issue.category = "documentation".to_string();
            issue.issue_type = if *doc == "README" { "task" } else { "chore" }.to_string();
            issue.priority = *priority;
            issue.confidence = 1.0;
            issue.discovered_by = self.name().to_string();
            issue.add_tag("docs");
            issue.evidence.insert("expected", *doc);
            result.issues_discovered.push(issue);
        }

        // Large files with no commentary: heuristic, needs human judgment.
        let p95 = ctx.file_sizes.p95;
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
            if (text.len() as f64) <= p95 || text.len() < 2048 {
                continue;
            }
            if Self::comment_lines(&text) > 0 {
                continue;
            }

            let rel = relative_path(ctx, &path);
            result.stats.patterns_found += 1;
            let mut issue = DiscoveredIssue::new(
                format!("Large undocumented source file {rel}"),
                format!(
                    "{rel} is {} bytes (above the p95 of {p95:.0}) and contains no \
                     comment lines.",
                    text.len()
                ),
            );
            issue.category = "documentation".to_string();
            issue.issue_type = "task".to_string();
            issue.priority = 3;
            issue.confidence = 0.6;
            issue.discovered_by = self.name().to_string();
            issue.file_path = Some(rel.clone());
            issue.add_tag("docs");
            issue.evidence.insert("byte_len", text.len());
            result.issues_discovered.push(issue);
        }

        result.stats.issues_found = result.issues_discovered.len();
        result.stats.duration_ms = started.elapsed().as_millis() as u64;
        result.context = format!(
            "{} documentation gaps ({} files inspected)",
            result.stats.patterns_found, result.stats.files_analyzed
        );
        result.reasoning = "absences reported as facts; prose quality not assessed".to_string();
        debug!(gaps = result.stats.patterns_found, "doc coverage scan complete");
        Ok(result)
    }
}
