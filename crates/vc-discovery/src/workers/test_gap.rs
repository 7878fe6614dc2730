use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use vc_core::cancel::CancelToken;
use vc_core::context::{language_for_extension, CodebaseContext};
use vc_core::issue::DiscoveredIssue;

use crate::worker::{CostEstimate, DiscoveryWorker, WorkerError, WorkerResult};

/// Languages with at least this many source files and zero test files get
/// reported.
const MIN_SOURCE_FILES: usize = 5;

/// Documentation languages never expected to carry tests.
const NON_CODE: &[&str] = &["Markdown", "YAML", "TOML", "JSON", "HTML", "CSS"];

/// Counts test files against source files per language and reports
/// languages with none at all.
pub struct TestGapWorker;

impl TestGapWorker {
    pub fn new() -> Self {
        Self
    }

    fn is_test_file(path: &str) -> bool {
        let lower = path.replace('\\', "/").to_ascii_lowercase();
        if lower
            .split('/')
            .any(|seg| seg == "tests" || seg == "test" || seg == "testdata")
        {
            return true;
        }
        let file_name = lower.rsplit('/').next().unwrap_or(&lower);
        file_name.ends_with("_test.rs")
            || file_name.ends_with("_test.go")
            || file_name.starts_with("test_")
            || file_name.contains(".test.")
            || file_name.contains(".spec.")
    }
}

impl Default for TestGapWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryWorker for TestGapWorker {
    fn name(&self) -> &str {
        "test-gap"
    }

    fn philosophy(&self) -> &str {
        "Code without any tests is code whose behaviour nobody has promised to keep."
    }

    fn scope(&self) -> &str {
        "per-language source vs test file counts"
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

        // (source, test) counts per language, from one walk.
        let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        let walker = ignore::WalkBuilder::new(&ctx.root)
            .hidden(true)
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
            let path = entry.path();
            let Some(language) = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .and_then(|e| language_for_extension(&e))
            else {
                continue;
            };
            if NON_CODE.contains(&language) {
                continue;
            }
            result.stats.files_analyzed += 1;
            let slot = counts.entry(language.to_string()).or_insert((0, 0));
            if Self::is_test_file(&path.to_string_lossy()) {
                slot.1 += 1;
            } else {
                slot.0 += 1;
            }
        }

        for (language, (sources, tests)) in &counts {
            if *sources < MIN_SOURCE_FILES || *tests > 0 {
                continue;
            }
            result.stats.patterns_found += 1;
            let mut issue = DiscoveredIssue::new(
                format!("No test files for {sources} {language} source files"),
                format!(
                    "The repository contains {sources} {language} source files and no \
                     recognisable test files for that language."
                ),
            );
            issue.category = "testing".to_string();
            issue.issue_type = "task".to_string();
            issue.priority = 2;
            // Counting is exact, whether tests are warranted is not.
            issue.confidence = 0.7;
            issue.discovered_by = self.name().to_string();
            issue.add_tag("testing");
            issue.evidence.insert("language", language.as_str());
            issue.evidence.insert("source_files", *sources);
            issue.evidence.insert("test_files", *tests);
            result.issues_discovered.push(issue);
        }

        result.stats.issues_found = result.issues_discovered.len();
        result.stats.duration_ms = started.elapsed().as_millis() as u64;
        result.context = {
            let summary: Vec<String> = counts
                .iter()
                .map(|(lang, (s, t))| format!("{lang}: {s} source / {t} test"))
                .collect();
            summary.join(", ")
        };
        result.reasoning = "file counts only; test adequacy not judged".to_string();
        debug!(languages = counts.len(), gaps = result.stats.patterns_found, "test gap scan complete");
        Ok(result)
    }
}
