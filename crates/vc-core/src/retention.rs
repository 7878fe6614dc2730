use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("retention_days {0} out of range (expected 1..=365)")]
    RetentionDays(u32),
    #[error("retention_critical_days {0} out of range (expected 1..=730)")]
    RetentionCriticalDays(u32),
    #[error("retention_critical_days {critical} must be >= retention_days {normal}")]
    CriticalBelowNormal { critical: u32, normal: u32 },
    #[error("per_issue_limit_events {0} out of range (expected 0 or 100..=10000)")]
    PerIssueLimit(i64),
    #[error("global_limit_events {0} out of range (expected 1000..=1000000)")]
    GlobalLimit(u64),
    #[error("cleanup_interval_hours {0} out of range (expected 1..=168)")]
    CleanupInterval(u32),
    #[error("cleanup_batch_size {0} out of range (expected 100..=10000)")]
    CleanupBatchSize(u32),
    #[error("unknown cleanup_strategy: `{0}`")]
    UnknownStrategy(String),
    #[error("invalid value for {key}: {message}")]
    InvalidEnv { key: String, message: String },
}

// ---------------------------------------------------------------------------
// CleanupStrategy
// ---------------------------------------------------------------------------

/// Which events the cleanup loop deletes first once a limit is hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStrategy {
    OldestFirst,
    OldestNonCritical,
}

impl CleanupStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupStrategy::OldestFirst => "oldest_first",
            CleanupStrategy::OldestNonCritical => "oldest_non_critical",
        }
    }
}

impl FromStr for CleanupStrategy {
    type Err = RetentionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oldest_first" => Ok(CleanupStrategy::OldestFirst),
            "oldest_non_critical" => Ok(CleanupStrategy::OldestNonCritical),
            other => Err(RetentionError::UnknownStrategy(other.to_string())),
        }
    }
}

impl fmt::Display for CleanupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EventRetentionConfig
// ---------------------------------------------------------------------------

/// Retention policy for persisted issue events, consumed by the sandbox
/// manager and the cleanup loop.
///
/// Validated once at construction and then immutable. Critical events are
/// kept at least as long as normal events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRetentionConfig {
    pub retention_days: u32,
    pub retention_critical_days: u32,
    /// 0 means unlimited; otherwise 100..=10000.
    pub per_issue_limit_events: u32,
    pub global_limit_events: u64,
    pub cleanup_interval_hours: u32,
    pub cleanup_batch_size: u32,
    pub cleanup_enabled: bool,
    pub cleanup_strategy: CleanupStrategy,
    pub cleanup_vacuum: bool,
}

impl Default for EventRetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: 90,
            retention_critical_days: 365,
            per_issue_limit_events: 1000,
            global_limit_events: 100_000,
            cleanup_interval_hours: 24,
            cleanup_batch_size: 1000,
            cleanup_enabled: true,
            cleanup_strategy: CleanupStrategy::OldestNonCritical,
            cleanup_vacuum: false,
        }
    }
}

const ENV_PREFIX: &str = "VC_EVENT_";

impl EventRetentionConfig {
    /// Enforce every range invariant plus the critical-vs-normal relation.
    pub fn validate(&self) -> Result<(), RetentionError> {
        if !(1..=365).contains(&self.retention_days) {
            return Err(RetentionError::RetentionDays(self.retention_days));
        }
        if !(1..=730).contains(&self.retention_critical_days) {
            return Err(RetentionError::RetentionCriticalDays(
                self.retention_critical_days,
            ));
        }
        if self.retention_critical_days < self.retention_days {
            return Err(RetentionError::CriticalBelowNormal {
                critical: self.retention_critical_days,
                normal: self.retention_days,
            });
        }
        if self.per_issue_limit_events != 0
            && !(100..=10_000).contains(&self.per_issue_limit_events)
        {
            return Err(RetentionError::PerIssueLimit(i64::from(
                self.per_issue_limit_events,
            )));
        }
        if !(1000..=1_000_000).contains(&self.global_limit_events) {
            return Err(RetentionError::GlobalLimit(self.global_limit_events));
        }
        if !(1..=168).contains(&self.cleanup_interval_hours) {
            return Err(RetentionError::CleanupInterval(self.cleanup_interval_hours));
        }
        if !(100..=10_000).contains(&self.cleanup_batch_size) {
            return Err(RetentionError::CleanupBatchSize(self.cleanup_batch_size));
        }
        Ok(())
    }

    /// Load from `VC_EVENT_*` environment variables, falling back to defaults
    /// for unset keys. Parse failures name the offending key. The result is
    /// validated before being returned.
    pub fn from_env() -> Result<Self, RetentionError> {
        let mut cfg = Self::default();

        if let Some(v) = env_u32("RETENTION_DAYS")? {
            cfg.retention_days = v;
        }
        if let Some(v) = env_u32("RETENTION_CRITICAL_DAYS")? {
            cfg.retention_critical_days = v;
        }
        if let Some(v) = env_i64("PER_ISSUE_LIMIT")? {
            if v < 0 {
                return Err(RetentionError::PerIssueLimit(v));
            }
            cfg.per_issue_limit_events =
                u32::try_from(v).map_err(|_| RetentionError::PerIssueLimit(v))?;
        }
        if let Some(v) = env_u64("GLOBAL_LIMIT")? {
            cfg.global_limit_events = v;
        }
        if let Some(v) = env_u32("CLEANUP_INTERVAL_HOURS")? {
            cfg.cleanup_interval_hours = v;
        }
        if let Some(v) = env_u32("CLEANUP_BATCH_SIZE")? {
            cfg.cleanup_batch_size = v;
        }
        if let Some(v) = env_bool("CLEANUP_ENABLED")? {
            cfg.cleanup_enabled = v;
        }
        if let Some(raw) = env_raw("CLEANUP_STRATEGY") {
            cfg.cleanup_strategy = raw.parse()?;
        }
        if let Some(v) = env_bool("CLEANUP_VACUUM")? {
            cfg.cleanup_vacuum = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

/// Every field in a stable order, for logging and comparison.
impl fmt::Display for EventRetentionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "retention_days={} retention_critical_days={} per_issue_limit_events={} \
             global_limit_events={} cleanup_interval_hours={} cleanup_batch_size={} \
             cleanup_enabled={} cleanup_strategy={} cleanup_vacuum={}",
            self.retention_days,
            self.retention_critical_days,
            self.per_issue_limit_events,
            self.global_limit_events,
            self.cleanup_interval_hours,
            self.cleanup_batch_size,
            self.cleanup_enabled,
            self.cleanup_strategy,
            self.cleanup_vacuum,
        )
    }
}

// ---------------------------------------------------------------------------
// Env parsing helpers
// ---------------------------------------------------------------------------

fn env_raw(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}")).ok()
}

fn env_u32(key: &str) -> Result<Option<u32>, RetentionError> {
    parse_env(key, |raw| raw.parse::<u32>().map_err(|e| e.to_string()))
}

fn env_u64(key: &str) -> Result<Option<u64>, RetentionError> {
    parse_env(key, |raw| raw.parse::<u64>().map_err(|e| e.to_string()))
}

fn env_i64(key: &str) -> Result<Option<i64>, RetentionError> {
    parse_env(key, |raw| raw.parse::<i64>().map_err(|e| e.to_string()))
}

fn env_bool(key: &str) -> Result<Option<bool>, RetentionError> {
    parse_env(key, |raw| match raw {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("expected boolean, got `{other}`")),
    })
}

fn parse_env<T>(
    key: &str,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<Option<T>, RetentionError> {
    match env_raw(key) {
        None => Ok(None),
        Some(raw) => parse(raw.trim()).map(Some).map_err(|message| {
            RetentionError::InvalidEnv {
                key: format!("{ENV_PREFIX}{key}"),
                message,
            }
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
