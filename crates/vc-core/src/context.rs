use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::CancelToken;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("root directory not found: {0}")]
    RootNotFound(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("scan cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// FileSizeStats
// ---------------------------------------------------------------------------

/// Distribution of file sizes (bytes) across the scanned repository.
///
/// Percentiles use the R-7 method: linear interpolation between the two
/// nearest ranks with `h = (n - 1) * p`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSizeStats {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl FileSizeStats {
    /// Compute stats over an unsorted sample. Empty samples produce all-zero
    /// stats with `count == 0`.
    pub fn from_sample(sizes: &[u64]) -> Self {
        if sizes.is_empty() {
            return Self {
                mean: 0.0,
                median: 0.0,
                std_dev: 0.0,
                p95: 0.0,
                p99: 0.0,
                min: 0.0,
                max: 0.0,
                count: 0,
            };
        }

        let mut sorted: Vec<f64> = sizes.iter().map(|&s| s as f64).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        let mean = sum / count as f64;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

        Self {
            mean,
            median: percentile(&sorted, 0.50),
            std_dev: variance.sqrt(),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            min: sorted[0],
            max: sorted[count - 1],
            count,
        }
    }
}

/// R-7 percentile (the spreadsheet `PERCENTILE` method) over a sorted sample.
///
/// `p` is a fraction in `[0, 1]`. The sample must be non-empty and sorted
/// ascending.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let h = (n - 1) as f64 * p;
    let lower = h.floor() as usize;
    let upper = (lower + 1).min(n - 1);
    let frac = h - lower as f64;
    sorted[lower] + frac * (sorted[upper] - sorted[lower])
}

// ---------------------------------------------------------------------------
// CodebaseContext
// ---------------------------------------------------------------------------

/// One-shot snapshot of a repository, built once per discovery run and shared
/// read-only (typically via `Arc`) by every worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodebaseContext {
    pub root: PathBuf,
    pub total_files: usize,
    pub total_lines: u64,
    /// Language name to file count, keyed off the lowercase extension.
    pub languages: BTreeMap<String, usize>,
    pub file_sizes: FileSizeStats,
}

impl CodebaseContext {
    /// File count for a language, zero when absent.
    pub fn files_for_language(&self, language: &str) -> usize {
        self.languages.get(language).copied().unwrap_or(0)
    }

    /// The dominant language by file count, if any files were recognised.
    pub fn primary_language(&self) -> Option<&str> {
        self.languages
            .iter()
            .max_by_key(|(_, &count)| count)
            .map(|(name, _)| name.as_str())
    }
}

// ---------------------------------------------------------------------------
// ContextBuilder
// ---------------------------------------------------------------------------

/// Directory prefixes excluded from every scan.
const DEFAULT_EXCLUDES: &[&str] = &[
    "vendor",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    "coverage",
];

/// Generated-file globs excluded from every scan.
const GENERATED_GLOBS: &[&str] = &[
    "*.min.js",
    "*.min.css",
    "*.lock",
    "package-lock.json",
    "yarn.lock",
    "*.pb.go",
    "*_pb2.py",
    "*.generated.*",
    "*_generated.*",
];

/// Builds a [`CodebaseContext`] with a single traversal from `root`.
///
/// The walk respects `.gitignore`, skips hidden path segments, the default
/// exclusion set, and common generated-file globs. Sizes are recorded for
/// every surviving file; lines are counted only for recognised text
/// extensions.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    root: PathBuf,
    extra_excludes: Vec<String>,
}

impl ContextBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extra_excludes: Vec::new(),
        }
    }

    /// Add an extra exclusion glob on top of the defaults.
    pub fn exclude(mut self, glob: impl Into<String>) -> Self {
        self.extra_excludes.push(glob.into());
        self
    }

    pub fn build(&self, cancel: &CancelToken) -> Result<CodebaseContext, ContextError> {
        if !self.root.is_dir() {
            return Err(ContextError::RootNotFound(self.root.clone()));
        }

        let mut builder = ignore::WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .follow_links(false);

        let mut overrides = ignore::overrides::OverrideBuilder::new(&self.root);
        for dir in DEFAULT_EXCLUDES {
            let _ = overrides.add(&format!("!{dir}/**"));
            let _ = overrides.add(&format!("!{dir}"));
        }
        for glob in GENERATED_GLOBS {
            let _ = overrides.add(&format!("!{glob}"));
        }
        for glob in &self.extra_excludes {
            let _ = overrides.add(&format!("!{glob}"));
        }
        if let Ok(built) = overrides.build() {
            builder.overrides(built);
        }

        let mut sizes: Vec<u64> = Vec::new();
        let mut total_lines: u64 = 0;
        let mut languages: BTreeMap<String, usize> = BTreeMap::new();

        for entry in builder.build() {
            if cancel.is_cancelled() {
                return Err(ContextError::Cancelled);
            }

            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let path = entry.path();
            let size = match entry.metadata() {
                Ok(md) => md.len(),
                Err(err) => {
                    debug!(path = %path.display(), error = %err, "metadata unavailable");
                    continue;
                }
            };
            sizes.push(size);

            let ext = lowercase_extension(path);
            if let Some(language) = ext.as_deref().and_then(language_for_extension) {
                *languages.entry(language.to_string()).or_insert(0) += 1;
                match std::fs::read(path) {
                    Ok(bytes) => total_lines += count_lines(&bytes),
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to read file for line count");
                    }
                }
            }
        }

        let context = CodebaseContext {
            root: self.root.clone(),
            total_files: sizes.len(),
            total_lines,
            languages,
            file_sizes: FileSizeStats::from_sample(&sizes),
        };
        debug!(
            root = %context.root.display(),
            files = context.total_files,
            lines = context.total_lines,
            "codebase context built"
        );
        Ok(context)
    }
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Count newline-terminated lines, counting an unterminated final line.
fn count_lines(bytes: &[u8]) -> u64 {
    if bytes.is_empty() {
        return 0;
    }
    let newlines = bytes.iter().filter(|&&b| b == b'\n').count() as u64;
    if bytes.ends_with(b"\n") {
        newlines
    } else {
        newlines + 1
    }
}

/// Fixed extension-to-language map for recognised text files.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let language = match ext {
        "rs" => "Rust",
        "go" => "Go",
        "py" => "Python",
        "js" | "mjs" | "cjs" => "JavaScript",
        "jsx" => "JavaScript",
        "ts" | "mts" => "TypeScript",
        "tsx" => "TypeScript",
        "java" => "Java",
        "c" | "h" => "C",
        "cpp" | "cc" | "cxx" | "hpp" => "C++",
        "cs" => "C#",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "kt" | "kts" => "Kotlin",
        "scala" => "Scala",
        "sh" | "bash" => "Shell",
        "sql" => "SQL",
        "html" | "htm" => "HTML",
        "css" | "scss" => "CSS",
        "md" | "markdown" => "Markdown",
        "yaml" | "yml" => "YAML",
        "toml" => "TOML",
        "json" => "JSON",
        "proto" => "Protobuf",
        _ => return None,
    };
    Some(language)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
