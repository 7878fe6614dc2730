//! Built-in discovery workers.
//!
//! Every built-in collects structural facts and leaves judgment to the AI
//! step downstream: an oversized file is reported with its measurements, not
//! a refactoring verdict. Malformed files are counted as `errors_ignored`
//! and skipped; test files and generated files are never scanned.

mod code_structure;
mod doc_coverage;
mod repo_hygiene;
mod test_gap;
mod todo_scan;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use code_structure::CodeStructureWorker;
pub use doc_coverage::DocCoverageWorker;
pub use repo_hygiene::RepoHygieneWorker;
pub use test_gap::TestGapWorker;
pub use todo_scan::TodoScanWorker;

use vc_core::context::{language_for_extension, CodebaseContext};

use crate::worker::DiscoveryWorker;

/// One of each built-in worker.
pub fn builtin_workers() -> Vec<Arc<dyn DiscoveryWorker>> {
    vec![
        Arc::new(TodoScanWorker::new()),
        Arc::new(CodeStructureWorker::new()),
        Arc::new(DocCoverageWorker::new()),
        Arc::new(RepoHygieneWorker::new()),
        Arc::new(TestGapWorker::new()),
    ]
}

/// True for files the built-ins never report on: tests, fixtures, and
/// generated artifacts.
pub(crate) fn is_test_or_generated(path: &Path) -> bool {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let lower = normalized.to_ascii_lowercase();

    if lower.split('/').any(|seg| {
        seg == "tests" || seg == "test" || seg == "testdata" || seg == "fixtures"
    }) {
        return true;
    }

    let file_name = lower.rsplit('/').next().unwrap_or(&lower);
    file_name.ends_with("_test.rs")
        || file_name.ends_with("_test.go")
        || file_name.starts_with("test_")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
        || file_name.contains(".generated.")
        || file_name.contains("_generated.")
        || file_name.ends_with(".min.js")
        || file_name.ends_with(".min.css")
}

/// Recognised source files under the context root, sorted for deterministic
/// output. Tests and generated files are excluded.
pub(crate) fn source_files(ctx: &CodebaseContext) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    let walker = ignore::WalkBuilder::new(&ctx.root)
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .build();

    for entry in walker.flatten() {
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let path = entry.into_path();
        let recognised = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .is_some_and(|e| language_for_extension(&e).is_some());
        if recognised && !is_test_or_generated(&path) {
            files.push(path);
        }
    }
    files.sort();
    files
}

/// Path relative to the context root, for issue locations.
pub(crate) fn relative_path(ctx: &CodebaseContext, path: &Path) -> String {
    path.strip_prefix(&ctx.root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_have_unique_names() {
        let workers = builtin_workers();
        let mut names: Vec<&str> = workers.iter().map(|w| w.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), workers.len());
    }

    #[test]
    fn test_and_generated_paths_are_skipped() {
        assert!(is_test_or_generated(Path::new("crates/x/tests/api_test.rs")));
        assert!(is_test_or_generated(Path::new("src/parser_test.go")));
        assert!(is_test_or_generated(Path::new("src/test_helpers.py")));
        assert!(is_test_or_generated(Path::new("web/app.test.ts")));
        assert!(is_test_or_generated(Path::new("schema_generated.rs")));
        assert!(is_test_or_generated(Path::new("assets/app.min.js")));

        assert!(!is_test_or_generated(Path::new("src/attestation.rs")));
        assert!(!is_test_or_generated(Path::new("src/contest.rs")));
    }
}
