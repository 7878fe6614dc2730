use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use vc_core::cancel::CancelToken;
use vc_core::context::CodebaseContext;
use vc_core::issue::DiscoveredIssue;

use crate::worker::{CostEstimate, DiscoveryWorker, WorkerError, WorkerResult};

use super::{relative_path, source_files};

/// Files longer than this many lines are reported as oversized.
const LONG_FILE_LINES: usize = 600;
/// A line longer than this many characters counts as overlong.
const LONG_LINE_CHARS: usize = 160;
/// Files with more overlong lines than this are reported.
const LONG_LINE_THRESHOLD: usize = 20;

/// Reports structural outliers: oversized files and files dense with
/// overlong lines, measured against the repository's own size distribution.
pub struct CodeStructureWorker;

impl CodeStructureWorker {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CodeStructureWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryWorker for CodeStructureWorker {
    fn name(&self) -> &str {
        "code-structure"
    }

    fn philosophy(&self) -> &str {
        "Structure that drifts far from the repository's own norms is where \
         maintenance cost concentrates."
    }

    fn scope(&self) -> &str {
        "file size and line length outliers relative to the codebase distribution"
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
            let rel = relative_path(ctx, &path);

            let line_count = text.lines().count();
            let byte_len = text.len() as f64;
            let overlong = text
                .lines()
                .filter(|line| line.chars().count() > LONG_LINE_CHARS)
                .count();

            if line_count > LONG_FILE_LINES {
                result.stats.patterns_found += 1;
                let mut issue = DiscoveredIssue::new(
                    format!("Oversized source file {rel}"),
                    format!(
                        "{rel} spans {line_count} lines ({byte_len:.0} bytes); the \
                         repository's p95 file size is {p95:.0} bytes."
                    ),
                );
                issue.category = "maintainability".to_string();
                issue.issue_type = "task".to_string();
                issue.priority = 3;
                // Size is an outlier, whether it matters needs context.
                issue.confidence = if byte_len > p95 { 0.6 } else { 0.5 };
                issue.discovered_by = self.name().to_string();
                issue.file_path = Some(rel.clone());
                issue.add_tag("structure");
                issue.evidence.insert("line_count", line_count);
                issue.evidence.insert("byte_len", byte_len);
                issue.evidence.insert("p95_bytes", p95);
                result.issues_discovered.push(issue);
            }

            if overlong > LONG_LINE_THRESHOLD {
                result.stats.patterns_found += 1;
                let mut issue = DiscoveredIssue::new(
                    format!("Dense overlong lines in {rel}"),
                    format!(
                        "{rel} has {overlong} lines over {LONG_LINE_CHARS} characters, \
                         suggesting generated or deeply nested code."
                    ),
                );
                issue.category = "maintainability".to_string();
                issue.issue_type = "chore".to_string();
                issue.priority = 4;
                issue.confidence = 0.5;
                issue.discovered_by = self.name().to_string();
                issue.file_path = Some(rel.clone());
                issue.add_tag("structure");
                issue.evidence.insert("overlong_lines", overlong);
                result.issues_discovered.push(issue);
            }
        }

        result.stats.issues_found = result.issues_discovered.len();
        result.stats.duration_ms = started.elapsed().as_millis() as u64;
        result.context = format!(
            "{} structural outliers across {} files (p95 file size {:.0} bytes)",
            result.stats.patterns_found, result.stats.files_analyzed, p95
        );
        result.reasoning =
            "outliers measured against the repository's own distribution".to_string();
        debug!(
            outliers = result.stats.patterns_found,
            files = result.stats.files_analyzed,
            "code structure scan complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vc_core::context::ContextBuilder;

    async fn scan(dir: &std::path::Path) -> WorkerResult {
        let ctx = ContextBuilder::new(dir).build(&CancelToken::new()).unwrap();
        CodeStructureWorker::new()
            .analyze(&CancelToken::new(), &ctx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn flags_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let long = "fn f() {}\n".repeat(LONG_FILE_LINES + 10);
        std::fs::write(dir.path().join("huge.rs"), long).unwrap();
        std::fs::write(dir.path().join("small.rs"), "fn s() {}\n").unwrap();

        let result = scan(dir.path()).await;
        assert_eq!(result.issues_discovered.len(), 1);
        let issue = &result.issues_discovered[0];
        assert!(issue.title.contains("huge.rs"));
        assert!(issue.confidence >= 0.5 && issue.confidence <= 0.7);
        assert_eq!(
            issue.evidence.get("line_count").and_then(|v| v.as_int()),
            Some((LONG_FILE_LINES + 10) as i64)
        );
        issue.validate().unwrap();
    }

    #[tokio::test]
    async fn flags_dense_overlong_lines() {
        let dir = tempfile::tempdir().unwrap();
        let wide_line = format!("let x = \"{}\";\n", "y".repeat(LONG_LINE_CHARS + 40));
        std::fs::write(
            dir.path().join("wide.rs"),
            wide_line.repeat(LONG_LINE_THRESHOLD + 5),
        )
        .unwrap();

        let result = scan(dir.path()).await;
        assert_eq!(result.issues_discovered.len(), 1);
        assert!(result.issues_discovered[0].title.contains("overlong"));
        assert_eq!(result.issues_discovered[0].priority, 4);
    }

    #[tokio::test]
    async fn clean_tree_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tidy.rs"), "fn tidy() {}\n").unwrap();
        let result = scan(dir.path()).await;
        assert!(result.issues_discovered.is_empty());
        assert_eq!(result.stats.files_analyzed, 1);
    }
}
