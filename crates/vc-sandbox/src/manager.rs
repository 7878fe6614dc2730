use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use vc_core::cancel::CancelToken;
use vc_core::issue::DiscoveredIssue;
use vc_core::store::{Issue, IssueStore, StoreError};
use vc_dedup::dedup::AiDeduplicator;
use vc_store::{mission_db_path, SqliteStorage};

use crate::git::{
    create_branch, create_worktree, delete_branch, git_status, modified_files, remove_worktree,
    validate_git_repo, GitError, GitRunner,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("mission issue not found in main database: {0}")]
    MissionNotFound(String),
    #[error("sandbox not found: {0}")]
    NotFound(String),
    #[error("merge failed, worktree preserved: {0}")]
    Merge(String),
    #[error("sandbox operation cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Sandbox types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Active,
    Completed,
    Failed,
    Cleaned,
}

/// Descriptor for one mission's isolated environment: a worktree on a
/// mission branch plus a scoped issue database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sandbox {
    pub id: String,
    pub mission_id: String,
    pub path: PathBuf,
    pub git_branch: String,
    pub git_worktree: PathBuf,
    pub beads_db: PathBuf,
    pub parent_repo: PathBuf,
    pub created: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub status: SandboxStatus,
}

/// Per-mission creation parameters.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub mission_id: String,
    /// Branch the mission branch forks from; defaults to `main`.
    pub base_branch: Option<String>,
}

/// Snapshot of a sandbox's working-tree state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxState {
    pub sandbox: Sandbox,
    pub git_status: String,
    pub modified_files: Vec<String>,
}

// ---------------------------------------------------------------------------
// Manager config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SandboxManagerConfig {
    /// Directory all sandboxes are created under.
    pub sandbox_root: PathBuf,
    /// The repository worktrees are carved from. Must be a valid git repo.
    pub parent_repo: PathBuf,
    /// Keep the worktree of a Failed sandbox on cleanup.
    pub preserve_on_failure: bool,
    /// Keep mission branches after cleanup.
    pub keep_branches: bool,
    /// Age threshold for the periodic sweep.
    pub max_age: Duration,
}

impl SandboxManagerConfig {
    pub fn new(sandbox_root: impl Into<PathBuf>, parent_repo: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
            parent_repo: parent_repo.into(),
            preserve_on_failure: false,
            keep_branches: false,
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// SandboxManager
// ---------------------------------------------------------------------------

/// Creates, inspects and cleans per-mission sandboxes.
///
/// One reader-writer lock guards the active map, and it is never held across
/// VCS, database, or filesystem work: `create` does all its I/O first and
/// only takes the write lock to publish the descriptor, so creates for
/// different missions proceed in parallel.
pub struct SandboxManager {
    config: SandboxManagerConfig,
    main_db: Arc<dyn IssueStore>,
    deduplicator: Option<Arc<AiDeduplicator>>,
    git: Box<dyn GitRunner>,
    active: RwLock<HashMap<String, Sandbox>>,
}

impl SandboxManager {
    /// Construct a manager, validating the parent repository up front.
    pub fn new(
        config: SandboxManagerConfig,
        main_db: Arc<dyn IssueStore>,
        git: Box<dyn GitRunner>,
    ) -> Result<Self, SandboxError> {
        if config.sandbox_root.as_os_str().is_empty() {
            return Err(SandboxError::InvalidArg(
                "sandbox_root must not be empty".to_string(),
            ));
        }
        validate_git_repo(git.as_ref(), &config.parent_repo)?;
        Ok(Self {
            config,
            main_db,
            deduplicator: None,
            git,
            active: RwLock::new(HashMap::new()),
        })
    }

    /// Attach a deduplicator used when merging sandbox results back, so
    /// issues filed inside the sandbox do not duplicate existing ones.
    pub fn with_deduplicator(mut self, deduplicator: Arc<AiDeduplicator>) -> Self {
        self.deduplicator = Some(deduplicator);
        self
    }

    fn read_active(&self) -> RwLockReadGuard<'_, HashMap<String, Sandbox>> {
        self.active.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_active(&self) -> RwLockWriteGuard<'_, HashMap<String, Sandbox>> {
        self.active.write().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Create a sandbox for a mission: worktree, mission branch, isolated
    /// issue DB seeded with the mission's core issues.
    ///
    /// Atomic on failure: every error path releases the resources acquired
    /// before it, so no worktree directory or mission DB file survives a
    /// failed create.
    pub async fn create(
        &self,
        cancel: &CancelToken,
        config: SandboxConfig,
    ) -> Result<Sandbox, SandboxError> {
        if config.mission_id.trim().is_empty() {
            return Err(SandboxError::InvalidArg(
                "mission_id must not be empty".to_string(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }
        let base_branch = config.base_branch.as_deref().unwrap_or("main");

        let timestamp = Utc::now().timestamp();
        let sandbox_id = format!("sandbox-{}-{}", config.mission_id, timestamp);
        let branch_name = format!("mission/{}/{}", config.mission_id, timestamp);
        let worktree = self.config.sandbox_root.join(&sandbox_id);

        std::fs::create_dir_all(&self.config.sandbox_root)?;
        info!(
            sandbox = %sandbox_id,
            branch = %branch_name,
            base = base_branch,
            "creating sandbox"
        );

        create_worktree(
            self.git.as_ref(),
            &self.config.parent_repo,
            &worktree,
            base_branch,
        )?;

        if let Err(err) = create_branch(self.git.as_ref(), &worktree, &branch_name) {
            warn!(sandbox = %sandbox_id, error = %err, "branch creation failed; rolling back worktree");
            self.discard_worktree(&worktree);
            return Err(SandboxError::Git(GitError::Command(format!(
                "branch creation failed: {err}"
            ))));
        }

        let db_path = mission_db_path(&worktree);
        let isolated = match SqliteStorage::open(&db_path).await {
            Ok(storage) => storage,
            Err(err) => {
                warn!(sandbox = %sandbox_id, error = %err, "mission DB init failed; rolling back");
                self.discard_worktree(&worktree);
                return Err(err.into());
            }
        };

        if let Err(err) = self
            .copy_core_issues(cancel, &isolated, &config.mission_id)
            .await
        {
            warn!(sandbox = %sandbox_id, error = %err, "core issue copy failed; rolling back");
            let _ = isolated.close().await;
            self.discard_worktree(&worktree);
            return Err(err);
        }

        if let Err(err) = isolated.close().await {
            warn!(sandbox = %sandbox_id, error = %err, "mission DB close reported an error");
        }

        let now = Utc::now();
        let sandbox = Sandbox {
            id: sandbox_id.clone(),
            mission_id: config.mission_id,
            path: worktree.clone(),
            git_branch: branch_name,
            git_worktree: worktree,
            beads_db: db_path,
            parent_repo: self.config.parent_repo.clone(),
            created: now,
            last_used: now,
            status: SandboxStatus::Active,
        };

        self.write_active()
            .insert(sandbox_id.clone(), sandbox.clone());
        info!(sandbox = %sandbox_id, "sandbox active");
        Ok(sandbox)
    }

    /// Best-effort rollback of a worktree: ask git first, then sweep any
    /// leftover directory.
    fn discard_worktree(&self, worktree: &Path) {
        if let Err(err) = remove_worktree(self.git.as_ref(), &self.config.parent_repo, worktree) {
            warn!(worktree = %worktree.display(), error = %err, "worktree removal failed during rollback");
        }
        if worktree.exists() {
            if let Err(err) = std::fs::remove_dir_all(worktree) {
                warn!(worktree = %worktree.display(), error = %err, "directory sweep failed during rollback");
            }
        }
    }

    /// Copy the mission issue and its transitive dependencies ("core
    /// issues") from the main DB into the isolated one.
    async fn copy_core_issues(
        &self,
        cancel: &CancelToken,
        isolated: &SqliteStorage,
        mission_id: &str,
    ) -> Result<usize, SandboxError> {
        let mut queue: VecDeque<String> = VecDeque::from([mission_id.to_string()]);
        let mut seen: HashSet<String> = HashSet::new();
        let mut copied = 0usize;

        while let Some(id) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Err(SandboxError::Cancelled);
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            let issue = match self.main_db.get_issue(&id).await? {
                Some(issue) => issue,
                None if id == mission_id => {
                    return Err(SandboxError::MissionNotFound(id));
                }
                None => {
                    warn!(issue = %id, "dependency missing in main DB; skipping");
                    continue;
                }
            };
            for dep in &issue.dependencies {
                if !seen.contains(dep) {
                    queue.push_back(dep.clone());
                }
            }
            isolated.create_issue(&issue, "sandbox-seed").await?;
            copied += 1;
        }

        debug!(mission = mission_id, copied, "core issues copied into sandbox DB");
        Ok(copied)
    }

    // -----------------------------------------------------------------------
    // Read operations
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<Sandbox> {
        self.read_active().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Sandbox> {
        let mut sandboxes: Vec<Sandbox> = self.read_active().values().cloned().collect();
        sandboxes.sort_by(|a, b| a.id.cmp(&b.id));
        sandboxes
    }

    /// Update a sandbox's lifecycle status (driven by the external mission
    /// executor).
    pub fn set_status(&self, id: &str, status: SandboxStatus) -> Result<Sandbox, SandboxError> {
        let mut active = self.write_active();
        let sandbox = active
            .get_mut(id)
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))?;
        sandbox.status = status;
        sandbox.last_used = Utc::now();
        Ok(sandbox.clone())
    }

    /// Refresh `last_used` and gather the working-tree state of a sandbox.
    pub fn inspect_state(&self, id: &str) -> Result<SandboxState, SandboxError> {
        let sandbox = {
            let mut active = self.write_active();
            let sandbox = active
                .get_mut(id)
                .ok_or_else(|| SandboxError::NotFound(id.to_string()))?;
            sandbox.last_used = Utc::now();
            sandbox.clone()
        };

        // VCS reads happen outside the lock.
        let status = git_status(self.git.as_ref(), &sandbox.git_worktree)?;
        let modified = modified_files(self.git.as_ref(), &sandbox.git_worktree)?;
        Ok(SandboxState {
            sandbox,
            git_status: status,
            modified_files: modified,
        })
    }

    // -----------------------------------------------------------------------
    // Cleanup
    // -----------------------------------------------------------------------

    /// Tear down a sandbox: merge results back for Completed/Active
    /// sandboxes, remove the worktree and branch unless retention says
    /// otherwise, then drop the descriptor from the active map.
    ///
    /// A merge failure aborts before any deletion so the operator can
    /// recover the work.
    pub async fn cleanup(&self, cancel: &CancelToken, sandbox: &Sandbox) -> Result<(), SandboxError> {
        info!(sandbox = %sandbox.id, status = ?sandbox.status, "cleaning up sandbox");

        if sandbox.beads_db.exists() {
            let isolated = SqliteStorage::open(&sandbox.beads_db).await?;
            if matches!(
                sandbox.status,
                SandboxStatus::Completed | SandboxStatus::Active
            ) {
                if let Err(err) = self.merge_results(cancel, &isolated).await {
                    let _ = isolated.close().await;
                    return Err(SandboxError::Merge(err.to_string()));
                }
            }
            if let Err(err) = isolated.close().await {
                warn!(sandbox = %sandbox.id, error = %err, "mission DB close reported an error");
            }
        } else {
            debug!(sandbox = %sandbox.id, "mission DB absent; skipping merge");
        }

        let should_remove =
            !(sandbox.status == SandboxStatus::Failed && self.config.preserve_on_failure);
        if should_remove {
            remove_worktree(
                self.git.as_ref(),
                &self.config.parent_repo,
                &sandbox.git_worktree,
            )?;
            if !self.config.keep_branches {
                if let Err(err) =
                    delete_branch(self.git.as_ref(), &self.config.parent_repo, &sandbox.git_branch)
                {
                    warn!(branch = %sandbox.git_branch, error = %err, "branch deletion failed");
                }
            }
            if sandbox.path != sandbox.git_worktree && sandbox.path.exists() {
                std::fs::remove_dir_all(&sandbox.path)?;
            }
        } else {
            info!(sandbox = %sandbox.id, "preserving failed sandbox on disk");
        }

        // Always drop the descriptor, even when the filesystem was
        // preserved, so the map does not leak entries.
        {
            let mut active = self.write_active();
            if let Some(entry) = active.get_mut(&sandbox.id) {
                entry.status = SandboxStatus::Cleaned;
            }
            active.remove(&sandbox.id);
        }
        info!(sandbox = %sandbox.id, removed = should_remove, "sandbox cleaned");
        Ok(())
    }

    /// Merge issues created inside the sandbox into the main DB, skipping
    /// core-issue copies and (when a deduplicator is attached) semantic
    /// duplicates of existing issues.
    async fn merge_results(
        &self,
        cancel: &CancelToken,
        isolated: &SqliteStorage,
    ) -> Result<usize, SandboxError> {
        let mut merged = 0usize;
        for issue in isolated.list_issues().await? {
            if cancel.is_cancelled() {
                return Err(SandboxError::Cancelled);
            }
            if self.main_db.get_issue(&issue.id).await?.is_some() {
                continue; // a core-issue copy, not sandbox output
            }

            if let Some(dedup) = &self.deduplicator {
                let candidate = discovered_from_issue(&issue);
                match dedup
                    .check_duplicate_excluding(cancel, &candidate, Some(&issue.id))
                    .await
                {
                    Ok(decision) if decision.is_duplicate => {
                        info!(
                            issue = %issue.id,
                            duplicate_of = ?decision.duplicate_of,
                            "skipping duplicate during merge-back"
                        );
                        continue;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(issue = %issue.id, error = %err, "merge dedup check failed; filing anyway");
                    }
                }
            }

            match self.main_db.create_issue(&issue, "sandbox-merge").await {
                Ok(_) => merged += 1,
                Err(StoreError::AlreadyExists(id)) => {
                    debug!(issue = %id, "issue appeared in main DB mid-merge; skipping");
                }
                Err(err) => return Err(err.into()),
            }
        }
        info!(merged, "sandbox results merged into main DB");
        Ok(merged)
    }

    /// Clean every active sandbox not used within `older_than`. Zero means
    /// no cleanup. Per-sandbox failures are logged; the last error is
    /// returned after the sweep completes.
    pub async fn cleanup_all(
        &self,
        cancel: &CancelToken,
        older_than: Duration,
    ) -> Result<usize, SandboxError> {
        if older_than.is_zero() {
            return Ok(0);
        }
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| SandboxError::InvalidArg(e.to_string()))?;

        // Snapshot under the read lock, clean outside it.
        let stale: Vec<Sandbox> = self
            .read_active()
            .values()
            .filter(|sb| sb.last_used < cutoff)
            .cloned()
            .collect();

        let mut cleaned = 0usize;
        let mut last_error: Option<SandboxError> = None;
        for sandbox in stale {
            if cancel.is_cancelled() {
                return Err(SandboxError::Cancelled);
            }
            match self.cleanup(cancel, &sandbox).await {
                Ok(()) => cleaned += 1,
                Err(err) => {
                    warn!(sandbox = %sandbox.id, error = %err, "cleanup failed during sweep");
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(cleaned),
        }
    }

    /// Sweep sandboxes older than the configured `max_age`.
    pub async fn cleanup_expired(&self, cancel: &CancelToken) -> Result<usize, SandboxError> {
        self.cleanup_all(cancel, self.config.max_age).await
    }

    /// Prune old failed-sandbox directories from disk, keeping the
    /// `retention_count` most recent and never touching a directory that
    /// belongs to a currently tracked sandbox.
    pub fn cleanup_stale_failed_sandboxes(
        &self,
        cancel: &CancelToken,
        retention_count: usize,
    ) -> Result<usize, SandboxError> {
        if retention_count == 0 {
            return Ok(0); // keep all
        }
        if !self.config.sandbox_root.exists() {
            return Ok(0);
        }

        let active_paths: HashSet<PathBuf> = self
            .read_active()
            .values()
            .map(|sb| sb.path.clone())
            .collect();

        let mut candidates: Vec<(PathBuf, SystemTime)> = Vec::new();
        for entry in std::fs::read_dir(&self.config.sandbox_root)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "unreadable sandbox_root entry");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_dir() || active_paths.contains(&path) {
                continue;
            }
            let mtime = entry
                .metadata()
                .and_then(|md| md.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push((path, mtime));
        }

        if candidates.len() <= retention_count {
            return Ok(0);
        }

        // Most recent first; everything past the retention point goes.
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        let mut removed = 0usize;
        let mut last_error: Option<SandboxError> = None;
        for (path, _) in candidates.into_iter().skip(retention_count) {
            if cancel.is_cancelled() {
                return Err(SandboxError::Cancelled);
            }
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "removed stale sandbox directory");
                    removed += 1;
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to remove stale sandbox");
                    last_error = Some(err.into());
                }
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(removed),
        }
    }
}

/// View a persisted issue as a discovery candidate for the merge-back
/// duplicate check.
fn discovered_from_issue(issue: &Issue) -> DiscoveredIssue {
    let mut candidate = DiscoveredIssue::new(issue.title.clone(), issue.description.clone());
    candidate.category = issue.category.clone().unwrap_or_default();
    candidate.issue_type = issue.issue_type.as_str().to_string();
    candidate.priority = issue.priority.min(4);
    candidate.discovered_by = "sandbox-merge".to_string();
    candidate.confidence = 1.0;
    candidate
}
