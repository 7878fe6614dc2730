use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::evidence::Evidence;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("issue title must not be empty")]
    EmptyTitle,
    #[error("priority {0} out of range (expected 0..=4)")]
    PriorityOutOfRange(u8),
    #[error("confidence {0} out of range (expected 0.0..=1.0)")]
    ConfidenceOutOfRange(f64),
    #[error("line range inverted: start {start} > end {end}")]
    InvertedLineRange { start: u32, end: u32 },
    #[error("discovered_by must not be empty")]
    MissingDiscoverer,
}

// ---------------------------------------------------------------------------
// DiscoveredIssue
// ---------------------------------------------------------------------------

/// A candidate issue surfaced by a discovery worker.
///
/// `issue_type` is a free string at this stage; the filing path parses it
/// into the store's typed enum (unknown values become `task`). Workers record
/// structural facts in `evidence` for the downstream AI assessment and never
/// render a verdict themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredIssue {
    pub title: String,
    pub description: String,
    pub category: String,
    pub issue_type: String,
    /// 0 is most urgent, 4 least.
    pub priority: u8,
    pub tags: Vec<String>,
    pub file_path: Option<String>,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
    pub evidence: Evidence,
    pub discovered_by: String,
    pub discovered_at: DateTime<Utc>,
    pub confidence: f64,
}

impl DiscoveredIssue {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            category: String::new(),
            issue_type: "task".to_string(),
            priority: 2,
            tags: Vec::new(),
            file_path: None,
            line_start: None,
            line_end: None,
            evidence: Evidence::new(),
            discovered_by: String::new(),
            discovered_at: Utc::now(),
            confidence: 0.5,
        }
    }

    /// Append a tag, preserving insertion order and dropping duplicates.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.iter().any(|t| t == &tag) {
            self.tags.push(tag);
        }
    }

    /// Attach a file location. `line_end` defaults to `line_start` when the
    /// finding covers a single line.
    pub fn at_location(
        mut self,
        path: impl Into<String>,
        line_start: u32,
        line_end: Option<u32>,
    ) -> Self {
        self.file_path = Some(path.into());
        self.line_start = Some(line_start);
        self.line_end = Some(line_end.unwrap_or(line_start));
        self
    }

    /// Structural validation; enforced before an issue leaves a worker and
    /// again before deduplication.
    pub fn validate(&self) -> Result<(), IssueError> {
        if self.title.trim().is_empty() {
            return Err(IssueError::EmptyTitle);
        }
        if self.priority > 4 {
            return Err(IssueError::PriorityOutOfRange(self.priority));
        }
        if !(0.0..=1.0).contains(&self.confidence) || self.confidence.is_nan() {
            return Err(IssueError::ConfidenceOutOfRange(self.confidence));
        }
        if let (Some(start), Some(end)) = (self.line_start, self.line_end) {
            if end < start {
                return Err(IssueError::InvertedLineRange { start, end });
            }
        }
        if self.discovered_by.trim().is_empty() {
            return Err(IssueError::MissingDiscoverer);
        }
        Ok(())
    }
}
