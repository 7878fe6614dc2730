//! Shared data model for the Vigil Coder discovery engine.
//!
//! Everything the pipeline crates exchange lives here: discovered issues and
//! their opaque evidence maps, the one-shot codebase context, the issue-store
//! contract, the event-retention policy, and the cooperative cancellation
//! token threaded through long-running operations.

pub mod cancel;
pub mod context;
pub mod evidence;
pub mod issue;
pub mod retention;
pub mod store;

pub use cancel::CancelToken;
pub use context::{CodebaseContext, ContextBuilder, ContextError, FileSizeStats};
pub use evidence::{Evidence, EvidenceValue};
pub use issue::{DiscoveredIssue, IssueError};
pub use retention::{CleanupStrategy, EventRetentionConfig, RetentionError};
pub use store::{
    Issue, IssueEvent, IssueStatus, IssueStore, IssueType, StoreError, WorkFilter,
};
