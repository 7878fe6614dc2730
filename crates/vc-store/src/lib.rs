//! SQLite-backed issue store.
//!
//! `SqliteStorage` implements the [`IssueStore`] contract over an on-disk
//! database. The authoritative store of a repository lives at
//! `.beads/vc.db`; each sandbox carries its own isolated copy at
//! `.beads/mission.db` inside the worktree.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;
use tracing::debug;

use vc_core::store::{
    generate_issue_id, Issue, IssueEvent, IssueStatus, IssueStore, IssueType, StoreError,
    WorkFilter,
};

/// Directory under a repository root holding issue databases.
pub const BEADS_DIR: &str = ".beads";
/// File name of the authoritative database.
pub const MAIN_DB_FILE: &str = "vc.db";
/// File name of a sandbox's isolated database.
pub const MISSION_DB_FILE: &str = "mission.db";

/// Path of the authoritative issue DB for a repository.
pub fn main_db_path(repo_root: impl AsRef<Path>) -> PathBuf {
    repo_root.as_ref().join(BEADS_DIR).join(MAIN_DB_FILE)
}

/// Path of the isolated issue DB inside a sandbox worktree.
pub fn mission_db_path(worktree: impl AsRef<Path>) -> PathBuf {
    worktree.as_ref().join(BEADS_DIR).join(MISSION_DB_FILE)
}

// ---------------------------------------------------------------------------
// helpers – enum <-> SQLite string
// ---------------------------------------------------------------------------

fn enum_to_sql<T: serde::Serialize>(val: &T) -> String {
    let s = serde_json::to_string(val).unwrap_or_default();
    s.trim_matches('"').to_string()
}

fn enum_from_sql<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, rusqlite::Error> {
    let quoted = format!("\"{raw}\"");
    serde_json::from_str(&quoted).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn to_store_err(err: tokio_rusqlite::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

// ---------------------------------------------------------------------------
// SqliteStorage
// ---------------------------------------------------------------------------

/// Async SQLite-backed implementation of [`IssueStore`].
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Open (or create) a database at the given file path. The parent
    /// directory is created when missing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path).await.map_err(to_store_err)?;
        let storage = Self {
            conn,
            path: Some(path),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(to_store_err)?;
        let storage = Self { conn, path: None };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Filesystem path of this database, when file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS issues (
                        id          TEXT PRIMARY KEY,
                        title       TEXT NOT NULL,
                        description TEXT NOT NULL DEFAULT '',
                        category    TEXT,
                        issue_type  TEXT NOT NULL,
                        priority    INTEGER NOT NULL DEFAULT 2,
                        status      TEXT NOT NULL,
                        created_at  TEXT NOT NULL,
                        updated_at  TEXT NOT NULL,
                        closed_at   TEXT
                    );

                    CREATE INDEX IF NOT EXISTS idx_issues_status  ON issues(status);
                    CREATE INDEX IF NOT EXISTS idx_issues_updated ON issues(updated_at);

                    CREATE TABLE IF NOT EXISTS issue_labels (
                        issue_id TEXT NOT NULL,
                        label    TEXT NOT NULL,
                        PRIMARY KEY (issue_id, label)
                    );

                    CREATE TABLE IF NOT EXISTS issue_deps (
                        issue_id   TEXT NOT NULL,
                        depends_on TEXT NOT NULL,
                        PRIMARY KEY (issue_id, depends_on)
                    );

                    CREATE TABLE IF NOT EXISTS issue_events (
                        id         TEXT PRIMARY KEY,
                        issue_id   TEXT NOT NULL,
                        kind       TEXT NOT NULL,
                        actor      TEXT NOT NULL,
                        payload    TEXT NOT NULL,
                        critical   INTEGER NOT NULL DEFAULT 0,
                        created_at TEXT NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_events_issue ON issue_events(issue_id);
                    ",
                )?;
                Ok(())
            })
            .await
            .map_err(to_store_err)
    }

    /// Count of persisted events (used by retention tests and the cleanup
    /// loop's accounting).
    pub async fn event_count(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM issue_events", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(to_store_err)
    }
}

fn read_issue(conn: &rusqlite::Connection, id: &str) -> Result<Option<Issue>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, title, description, category, issue_type, priority, status,
                created_at, updated_at, closed_at
         FROM issues WHERE id = ?1",
    )?;
    let mut rows = stmt.query([id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let issue = issue_from_row(conn, row)?;
    Ok(Some(issue))
}

fn issue_from_row(
    conn: &rusqlite::Connection,
    row: &rusqlite::Row<'_>,
) -> Result<Issue, rusqlite::Error> {
    let id: String = row.get(0)?;
    let issue_type: String = row.get(4)?;
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    let closed_at: Option<String> = row.get(9)?;

    let labels = {
        let mut stmt =
            conn.prepare("SELECT label FROM issue_labels WHERE issue_id = ?1 ORDER BY label")?;
        let rows = stmt.query_map([&id], |r| r.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    let dependencies = {
        let mut stmt =
            conn.prepare("SELECT depends_on FROM issue_deps WHERE issue_id = ?1 ORDER BY depends_on")?;
        let rows = stmt.query_map([&id], |r| r.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    Ok(Issue {
        id,
        title: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        issue_type: enum_from_sql::<IssueType>(&issue_type)?,
        priority: row.get::<_, i64>(5)? as u8,
        status: enum_from_sql::<IssueStatus>(&status)?,
        labels,
        dependencies,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        closed_at: closed_at.as_deref().map(parse_ts).transpose()?,
    })
}

#[async_trait]
impl IssueStore for SqliteStorage {
    async fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>, StoreError> {
        let filter = filter.clone();
        self.conn
            .call(move |conn| {
                let mut sql = String::from(
                    "SELECT id, title, description, category, issue_type, priority, status,
                            created_at, updated_at, closed_at
                     FROM issues WHERE 1=1",
                );
                let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

                if let Some(status) = filter.status {
                    sql.push_str(" AND status = ?");
                    params.push(Box::new(enum_to_sql(&status)));
                } else if !filter.include_closed {
                    sql.push_str(" AND status != ?");
                    params.push(Box::new(enum_to_sql(&IssueStatus::Closed)));
                }
                if let Some(since) = filter.updated_since {
                    sql.push_str(" AND updated_at >= ?");
                    params.push(Box::new(since.to_rfc3339()));
                }
                sql.push_str(" ORDER BY updated_at DESC");
                if filter.limit > 0 {
                    sql.push_str(" LIMIT ?");
                    params.push(Box::new(filter.limit as i64));
                }

                let mut stmt = conn.prepare(&sql)?;
                let param_refs: Vec<&dyn rusqlite::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                let mut rows = stmt.query(param_refs.as_slice())?;
                let mut issues = Vec::new();
                while let Some(row) = rows.next()? {
                    issues.push(issue_from_row(conn, row)?);
                }
                Ok(issues)
            })
            .await
            .map_err(to_store_err)
    }

    async fn get_issue(&self, id: &str) -> Result<Option<Issue>, StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| Ok(read_issue(conn, &id)?))
            .await
            .map_err(to_store_err)
    }

    async fn list_issues(&self) -> Result<Vec<Issue>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, title, description, category, issue_type, priority, status,
                            created_at, updated_at, closed_at
                     FROM issues ORDER BY updated_at DESC",
                )?;
                let mut rows = stmt.query([])?;
                let mut issues = Vec::new();
                while let Some(row) = rows.next()? {
                    issues.push(issue_from_row(conn, row)?);
                }
                Ok(issues)
            })
            .await
            .map_err(to_store_err)
    }

    async fn create_issue(&self, issue: &Issue, actor: &str) -> Result<String, StoreError> {
        let mut record = issue.clone();
        if record.id.is_empty() {
            record.id = generate_issue_id();
        }
        let id = record.id.clone();
        let actor = actor.to_string();

        let created = self
            .conn
            .call(move |conn| {
                let existing: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM issues WHERE id = ?1",
                    [&record.id],
                    |row| row.get(0),
                )?;
                if existing > 0 {
                    return Ok(None);
                }

                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO issues
                         (id, title, description, category, issue_type, priority, status,
                          created_at, updated_at, closed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    rusqlite::params![
                        record.id,
                        record.title,
                        record.description,
                        record.category,
                        enum_to_sql(&record.issue_type),
                        i64::from(record.priority),
                        enum_to_sql(&record.status),
                        record.created_at.to_rfc3339(),
                        record.updated_at.to_rfc3339(),
                        record.closed_at.map(|t| t.to_rfc3339()),
                    ],
                )?;
                for label in &record.labels {
                    tx.execute(
                        "INSERT OR IGNORE INTO issue_labels (issue_id, label) VALUES (?1, ?2)",
                        rusqlite::params![record.id, label],
                    )?;
                }
                for dep in &record.dependencies {
                    tx.execute(
                        "INSERT OR IGNORE INTO issue_deps (issue_id, depends_on) VALUES (?1, ?2)",
                        rusqlite::params![record.id, dep],
                    )?;
                }
                tx.execute(
                    "INSERT INTO issue_events (id, issue_id, kind, actor, payload, critical, created_at)
                     VALUES (?1, ?2, 'created', ?3, 'null', 0, ?4)",
                    rusqlite::params![
                        uuid_string(),
                        record.id,
                        actor,
                        Utc::now().to_rfc3339()
                    ],
                )?;
                tx.commit()?;
                Ok(Some(record.id.clone()))
            })
            .await
            .map_err(to_store_err)?;

        match created {
            Some(id) => {
                debug!(issue_id = %id, "issue created");
                Ok(id)
            }
            None => Err(StoreError::AlreadyExists(id)),
        }
    }

    async fn add_label(&self, id: &str, label: &str, _actor: &str) -> Result<(), StoreError> {
        let missing_id = id.to_string();
        let id = id.to_string();
        let label = label.to_string();
        let found = self
            .conn
            .call(move |conn| {
                let existing: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM issues WHERE id = ?1",
                    [&id],
                    |row| row.get(0),
                )?;
                if existing == 0 {
                    return Ok(None);
                }
                conn.execute(
                    "INSERT OR IGNORE INTO issue_labels (issue_id, label) VALUES (?1, ?2)",
                    rusqlite::params![id, label],
                )?;
                conn.execute(
                    "UPDATE issues SET updated_at = ?1 WHERE id = ?2",
                    rusqlite::params![Utc::now().to_rfc3339(), id],
                )?;
                Ok(Some(id.clone()))
            })
            .await
            .map_err(to_store_err)?;

        match found {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(missing_id)),
        }
    }

    async fn create_event(&self, event: &IssueEvent) -> Result<(), StoreError> {
        let event = event.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO issue_events (id, issue_id, kind, actor, payload, critical, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        event.id,
                        event.issue_id,
                        event.kind,
                        event.actor,
                        event.payload.to_string(),
                        event.critical as i64,
                        event.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(to_store_err)
    }

    async fn close(&self) -> Result<(), StoreError> {
        // Checkpoint the WAL so the file is complete on disk; the handle
        // itself is released on drop.
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(to_store_err)
    }
}

fn uuid_string() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use vc_core::store::IssueStatus;

    fn make_issue(title: &str) -> Issue {
        let mut issue = Issue::new(title, IssueType::Task);
        issue.description = format!("description for {title}");
        issue.category = Some("hygiene".to_string());
        issue
    }

    #[tokio::test]
    async fn create_and_get_issue() {
        let store = SqliteStorage::open_in_memory().await.unwrap();
        let id = store
            .create_issue(&make_issue("First issue"), "discovery")
            .await
            .unwrap();
        assert!(id.starts_with("vc-"));

        let fetched = store.get_issue(&id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "First issue");
        assert_eq!(fetched.status, IssueStatus::Open);
        assert_eq!(fetched.category.as_deref(), Some("hygiene"));
    }

    #[tokio::test]
    async fn create_duplicate_id_fails() {
        let store = SqliteStorage::open_in_memory().await.unwrap();
        let mut issue = make_issue("Pinned id");
        issue.id = "vc-fixed001".to_string();
        store.create_issue(&issue, "discovery").await.unwrap();
        let err = store.create_issue(&issue, "discovery").await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn labels_and_dependencies_round_trip() {
        let store = SqliteStorage::open_in_memory().await.unwrap();
        let mut issue = make_issue("With extras");
        issue.labels = vec!["discovered-by:todo-scan".to_string()];
        issue.dependencies = vec!["vc-dep00001".to_string()];
        let id = store.create_issue(&issue, "discovery").await.unwrap();

        store.add_label(&id, "category:hygiene", "discovery").await.unwrap();
        store.add_label(&id, "category:hygiene", "discovery").await.unwrap(); // idempotent

        let fetched = store.get_issue(&id).await.unwrap().unwrap();
        assert_eq!(fetched.labels.len(), 2);
        assert_eq!(fetched.dependencies, vec!["vc-dep00001"]);
    }

    #[tokio::test]
    async fn add_label_to_missing_issue_fails() {
        let store = SqliteStorage::open_in_memory().await.unwrap();
        let err = store
            .add_label("vc-missing0", "label", "discovery")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn get_ready_work_excludes_closed_by_default() {
        let store = SqliteStorage::open_in_memory().await.unwrap();
        store.create_issue(&make_issue("open one"), "t").await.unwrap();
        let mut closed = make_issue("closed one");
        closed.status = IssueStatus::Closed;
        closed.closed_at = Some(Utc::now());
        store.create_issue(&closed, "t").await.unwrap();

        let open = store
            .get_ready_work(&WorkFilter::default())
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].title, "open one");

        let all = store
            .get_ready_work(&WorkFilter {
                include_closed: true,
                ..WorkFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn get_ready_work_honours_limit_and_since() {
        let store = SqliteStorage::open_in_memory().await.unwrap();
        for i in 0..5 {
            store
                .create_issue(&make_issue(&format!("issue {i}")), "t")
                .await
                .unwrap();
        }

        let limited = store
            .get_ready_work(&WorkFilter {
                limit: 2,
                ..WorkFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);

        let future = Utc::now() + chrono::Duration::hours(1);
        let none = store
            .get_ready_work(&WorkFilter {
                updated_since: Some(future),
                ..WorkFilter::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn events_are_recorded() {
        let store = SqliteStorage::open_in_memory().await.unwrap();
        let id = store.create_issue(&make_issue("evented"), "t").await.unwrap();
        // `create_issue` writes one audit event itself.
        assert_eq!(store.event_count().await.unwrap(), 1);

        let mut event = IssueEvent::new(id, "status_changed", "operator");
        event.critical = true;
        store.create_event(&event).await.unwrap();
        assert_eq!(store.event_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = main_db_path(dir.path());
        let store = SqliteStorage::open(&db_path).await.unwrap();
        store.create_issue(&make_issue("on disk"), "t").await.unwrap();
        store.close().await.unwrap();
        assert!(db_path.exists());
        assert_eq!(store.path(), Some(db_path.as_path()));
    }

    #[test]
    fn db_path_helpers() {
        assert_eq!(
            main_db_path("/repo"),
            PathBuf::from("/repo/.beads/vc.db")
        );
        assert_eq!(
            mission_db_path("/sandbox/wt"),
            PathBuf::from("/sandbox/wt/.beads/mission.db")
        );
    }
}
