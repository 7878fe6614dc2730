use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("issue not found: {0}")]
    NotFound(String),
    #[error("issue already exists: {0}")]
    AlreadyExists(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// IssueType / IssueStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Bug,
    Task,
    Feature,
    Epic,
    Chore,
}

impl IssueType {
    /// Parse a free-form type string; unknown values become `Task`.
    pub fn parse_lossy(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bug" => IssueType::Bug,
            "task" => IssueType::Task,
            "feature" => IssueType::Feature,
            "epic" => IssueType::Epic,
            "chore" => IssueType::Chore,
            _ => IssueType::Task,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Bug => "bug",
            IssueType::Task => "task",
            IssueType::Feature => "feature",
            IssueType::Epic => "epic",
            IssueType::Chore => "chore",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl IssueStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, IssueStatus::Closed)
    }
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// A persisted issue record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub issue_type: IssueType,
    pub priority: u8,
    pub status: IssueStatus,
    pub labels: Vec<String>,
    /// Ids of issues this one depends on.
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Issue {
    pub fn new(title: impl Into<String>, issue_type: IssueType) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            title: title.into(),
            description: String::new(),
            category: None,
            issue_type,
            priority: 2,
            status: IssueStatus::Open,
            labels: Vec::new(),
            dependencies: Vec::new(),
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }
}

/// Generate a fresh issue id of the form `vc-<8 hex>`.
pub fn generate_issue_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("vc-{}", &simple[..8])
}

// ---------------------------------------------------------------------------
// IssueEvent
// ---------------------------------------------------------------------------

/// An audit event attached to an issue. Critical events survive longer under
/// the retention policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueEvent {
    pub id: String,
    pub issue_id: String,
    pub kind: String,
    pub actor: String,
    pub payload: serde_json::Value,
    pub critical: bool,
    pub created_at: DateTime<Utc>,
}

impl IssueEvent {
    pub fn new(issue_id: impl Into<String>, kind: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            issue_id: issue_id.into(),
            kind: kind.into(),
            actor: actor.into(),
            payload: serde_json::Value::Null,
            critical: false,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkFilter
// ---------------------------------------------------------------------------

/// Filter for `get_ready_work` queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkFilter {
    pub status: Option<IssueStatus>,
    pub include_closed: bool,
    /// Only issues updated at or after this instant.
    pub updated_since: Option<DateTime<Utc>>,
    /// 0 means no limit.
    pub limit: usize,
}

// ---------------------------------------------------------------------------
// IssueStore
// ---------------------------------------------------------------------------

/// The persistent issue store consumed by the discovery pipeline and the
/// sandbox manager.
///
/// Implementations must be safe for concurrent use across tasks belonging to
/// different sandboxes.
#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Recent issues matching `filter`, newest first.
    async fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>, StoreError>;

    /// Fetch one issue by id.
    async fn get_issue(&self, id: &str) -> Result<Option<Issue>, StoreError>;

    /// Every issue in the store, newest first.
    async fn list_issues(&self) -> Result<Vec<Issue>, StoreError>;

    /// Persist a new issue; returns the assigned id. When `issue.id` is
    /// empty an id is generated.
    async fn create_issue(&self, issue: &Issue, actor: &str) -> Result<String, StoreError>;

    /// Attach a label to an existing issue. Idempotent.
    async fn add_label(&self, id: &str, label: &str, actor: &str) -> Result<(), StoreError>;

    /// Append an audit event.
    async fn create_event(&self, event: &IssueEvent) -> Result<(), StoreError>;

    /// Flush and release the underlying handle.
    async fn close(&self) -> Result<(), StoreError>;
}

impl std::fmt::Debug for dyn IssueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueStore").finish()
    }
}
