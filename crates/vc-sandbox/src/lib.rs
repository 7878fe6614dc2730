//! Per-mission sandbox environments: an isolated git worktree on a mission
//! branch plus a scoped issue database, with merge-back and retention.

pub mod git;
pub mod manager;

pub use git::{GitError, GitOutput, GitRunner, RealGitRunner};
pub use manager::{
    Sandbox, SandboxConfig, SandboxError, SandboxManager, SandboxManagerConfig, SandboxState,
    SandboxStatus,
};
