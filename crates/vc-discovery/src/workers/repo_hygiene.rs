use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use vc_core::cancel::CancelToken;
use vc_core::context::CodebaseContext;
use vc_core::issue::DiscoveredIssue;

use crate::worker::{CostEstimate, DiscoveryWorker, WorkerError, WorkerResult};

use super::{relative_path, source_files};

/// Reports working-tree hygiene problems: committed conflict markers,
/// editor droppings, and a missing ignore file.
pub struct RepoHygieneWorker;

impl RepoHygieneWorker {
    pub fn new() -> Self {
        Self
    }

    fn is_dropping(file_name: &str) -> bool {
        file_name == ".DS_Store"
            || file_name.ends_with(".orig")
            || file_name.ends_with(".rej")
            || file_name.ends_with('~')
    }
}

impl Default for RepoHygieneWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryWorker for RepoHygieneWorker {
    fn name(&self) -> &str {
        "repo-hygiene"
    }

    fn philosophy(&self) -> &str {
        "Debris in the working tree is a tripwire for every later change; \
         sweep it before it hides a real problem."
    }

    fn scope(&self) -> &str {
        "conflict markers, editor droppings, missing ignore rules"
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

        // Unresolved conflict markers inside tracked sources.
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

            if let Some(line_idx) = text
                .lines()
                .position(|line| line.starts_with("<<<<<<< "))
            {
                let rel = relative_path(ctx, &path);
                let line_no = (line_idx + 1) as u32;
                result.stats.patterns_found += 1;
                let mut issue = DiscoveredIssue::new(
                    format!("Unresolved merge conflict marker in {rel}"),
                    format!("{rel}:{line_no} begins a conflict hunk that was committed."),
                )
                .at_location(rel, line_no, None);
                issue.category = "hygiene".to_string();
                issue.issue_type = "bug".to_string();
                issue.priority = 1;
                issue.confidence = 0.9;
                issue.discovered_by = self.name().to_string();
                issue.add_tag("hygiene");
                result.issues_discovered.push(issue);
            }
        }

        // Editor droppings anywhere in the tree, hidden files included.
        let walker = ignore::WalkBuilder::new(&ctx.root)
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .build();
        for entry in walker.flatten() {
            if cancel.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !Self::is_dropping(&file_name) {
                continue;
            }
            let rel = relative_path(ctx, entry.path());
            result.stats.patterns_found += 1;
            let mut issue = DiscoveredIssue::new(
                format!("Editor dropping committed: {rel}"),
                format!("{rel} looks like tool debris that should not be tracked."),
            );
            issue.category = "hygiene".to_string();
            issue.issue_type = "chore".to_string();
            issue.priority = 4;
            issue.confidence = 0.8;
            issue.discovered_by = self.name().to_string();
            issue.file_path = Some(rel);
            issue.add_tag("hygiene");
            result.issues_discovered.push(issue);
        }

        // A repository with sources but no ignore rules at the root.
        if ctx.total_files > 0 && !ctx.root.join(".gitignore").exists() {
            result.stats.patterns_found += 1;
            let mut issue = DiscoveredIssue::new(
                "Repository has no .gitignore",
                "No .gitignore exists at the repository root; build artifacts may get tracked.",
            );
            issue.category = "hygiene".to_string();
            issue.issue_type = "chore".to_string();
            issue.priority = 3;
            issue.confidence = 1.0;
            issue.discovered_by = self.name().to_string();
            issue.add_tag("hygiene");
            result.issues_discovered.push(issue);
        }

        result.stats.issues_found = result.issues_discovered.len();
        result.stats.duration_ms = started.elapsed().as_millis() as u64;
        result.context = format!(
            "{} hygiene findings across {} files",
            result.stats.patterns_found, result.stats.files_analyzed
        );
        result.reasoning = "mechanical hygiene facts only".to_string();
        debug!(findings = result.stats.patterns_found, "repo hygiene scan complete");
        Ok(result)
    }
}
