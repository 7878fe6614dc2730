use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("confidence_threshold {0} out of range (expected 0.0..=1.0)")]
    ConfidenceThreshold(f64),
    #[error("lookback_days {0} out of range (expected 1..=90)")]
    LookbackDays(u32),
    #[error("max_candidates {0} out of range (expected 1..=500)")]
    MaxCandidates(usize),
    #[error("batch_size {0} out of range (expected 1..=100)")]
    BatchSize(usize),
    #[error("min_title_length {0} out of range (expected 0..=500)")]
    MinTitleLength(usize),
    #[error("max_retries {0} out of range (expected 0..=10)")]
    MaxRetries(u32),
    #[error("request_timeout {0:?} out of range (expected >0s and <=300s)")]
    RequestTimeout(Duration),
    #[error("invalid value for {key}: {message}")]
    InvalidEnv { key: String, message: String },
}

// ---------------------------------------------------------------------------
// DeduplicatorConfig
// ---------------------------------------------------------------------------

/// Tuning for the AI deduplicator.
///
/// Validated once when the deduplicator is constructed, never on the hot
/// path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeduplicatorConfig {
    /// Minimum judge confidence for a duplicate verdict to stick.
    pub confidence_threshold: f64,
    /// How far back to look for comparable existing issues, in days.
    pub lookback_days: u32,
    /// Cap on existing-issue comparisons per candidate.
    pub max_candidates: usize,
    /// Candidates per AI call.
    pub batch_size: usize,
    pub enable_within_batch_dedup: bool,
    /// When the judge or store fails, file the issue instead of dropping it.
    pub fail_open: bool,
    pub include_closed_issues: bool,
    /// Titles shorter than this skip deduplication entirely.
    pub min_title_length: usize,
    pub max_retries: u32,
    pub request_timeout: Duration,
}

impl Default for DeduplicatorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.85,
            lookback_days: 7,
            max_candidates: 50,
            batch_size: 10,
            enable_within_batch_dedup: true,
            fail_open: true,
            include_closed_issues: false,
            min_title_length: 10,
            max_retries: 2,
            request_timeout: Duration::from_secs(30),
        }
    }
}

const ENV_PREFIX: &str = "VC_DEDUP_";
const MAX_TIMEOUT: Duration = Duration::from_secs(300);

impl DeduplicatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) || self.confidence_threshold.is_nan()
        {
            return Err(ConfigError::ConfidenceThreshold(self.confidence_threshold));
        }
        if !(1..=90).contains(&self.lookback_days) {
            return Err(ConfigError::LookbackDays(self.lookback_days));
        }
        if !(1..=500).contains(&self.max_candidates) {
            return Err(ConfigError::MaxCandidates(self.max_candidates));
        }
        if !(1..=100).contains(&self.batch_size) {
            return Err(ConfigError::BatchSize(self.batch_size));
        }
        if self.min_title_length > 500 {
            return Err(ConfigError::MinTitleLength(self.min_title_length));
        }
        if self.max_retries > 10 {
            return Err(ConfigError::MaxRetries(self.max_retries));
        }
        if self.request_timeout.is_zero() || self.request_timeout > MAX_TIMEOUT {
            return Err(ConfigError::RequestTimeout(self.request_timeout));
        }
        Ok(())
    }

    /// Load from `VC_DEDUP_*` environment variables, falling back to defaults
    /// for unset keys. Parse failures name the offending key; the result is
    /// validated before being returned.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(v) = env_f64("CONFIDENCE_THRESHOLD")? {
            cfg.confidence_threshold = v;
        }
        if let Some(v) = env_u32("LOOKBACK_DAYS")? {
            cfg.lookback_days = v;
        }
        if let Some(v) = env_usize("MAX_CANDIDATES")? {
            cfg.max_candidates = v;
        }
        if let Some(v) = env_usize("BATCH_SIZE")? {
            cfg.batch_size = v;
        }
        if let Some(v) = env_bool("WITHIN_BATCH")? {
            cfg.enable_within_batch_dedup = v;
        }
        if let Some(v) = env_bool("FAIL_OPEN")? {
            cfg.fail_open = v;
        }
        if let Some(v) = env_bool("INCLUDE_CLOSED")? {
            cfg.include_closed_issues = v;
        }
        if let Some(v) = env_usize("MIN_TITLE_LENGTH")? {
            cfg.min_title_length = v;
        }
        if let Some(v) = env_u32("MAX_RETRIES")? {
            cfg.max_retries = v;
        }
        if let Some(v) = env_u64("TIMEOUT_SECS")? {
            cfg.request_timeout = Duration::from_secs(v);
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// Env parsing helpers
// ---------------------------------------------------------------------------

fn env_raw(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}")).ok()
}

fn parse_env<T>(
    key: &str,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<Option<T>, ConfigError> {
    match env_raw(key) {
        None => Ok(None),
        Some(raw) => parse(raw.trim())
            .map(Some)
            .map_err(|message| ConfigError::InvalidEnv {
                key: format!("{ENV_PREFIX}{key}"),
                message,
            }),
    }
}

fn env_f64(key: &str) -> Result<Option<f64>, ConfigError> {
    parse_env(key, |raw| raw.parse::<f64>().map_err(|e| e.to_string()))
}

fn env_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    parse_env(key, |raw| raw.parse::<u32>().map_err(|e| e.to_string()))
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    parse_env(key, |raw| raw.parse::<u64>().map_err(|e| e.to_string()))
}

fn env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    parse_env(key, |raw| raw.parse::<usize>().map_err(|e| e.to_string()))
}

fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    parse_env(key, |raw| match raw {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("expected boolean, got `{other}`")),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_validate() {
        let cfg = DeduplicatorConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.fail_open, "fail_open must default to true");
        assert!((cfg.confidence_threshold - 0.85).abs() < f64::EPSILON);
        assert_eq!(cfg.lookback_days, 7);
        assert_eq!(cfg.max_candidates, 50);
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.min_title_length, 10);
    }

    #[test]
    fn confidence_threshold_bounds() {
        let mut cfg = DeduplicatorConfig::default();
        cfg.confidence_threshold = 1.01;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ConfidenceThreshold(_))
        ));
        cfg.confidence_threshold = -0.01;
        assert!(cfg.validate().is_err());
        cfg.confidence_threshold = 1.0;
        assert!(cfg.validate().is_ok());
        cfg.confidence_threshold = 0.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn lookback_window_bounds() {
        let mut cfg = DeduplicatorConfig::default();
        cfg.lookback_days = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::LookbackDays(0))));
        cfg.lookback_days = 91;
        assert!(cfg.validate().is_err());
        cfg.lookback_days = 90;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn candidate_and_batch_bounds() {
        let mut cfg = DeduplicatorConfig::default();
        cfg.max_candidates = 0;
        assert!(cfg.validate().is_err());
        cfg.max_candidates = 501;
        assert!(cfg.validate().is_err());
        cfg.max_candidates = 500;
        assert!(cfg.validate().is_ok());

        cfg.batch_size = 0;
        assert!(cfg.validate().is_err());
        cfg.batch_size = 101;
        assert!(cfg.validate().is_err());
        cfg.batch_size = 100;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn title_retry_timeout_bounds() {
        let mut cfg = DeduplicatorConfig::default();
        cfg.min_title_length = 501;
        assert!(cfg.validate().is_err());
        cfg.min_title_length = 0;
        assert!(cfg.validate().is_ok());

        cfg.max_retries = 11;
        assert!(cfg.validate().is_err());
        cfg.max_retries = 10;
        assert!(cfg.validate().is_ok());

        cfg.request_timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
        cfg.request_timeout = Duration::from_secs(301);
        assert!(cfg.validate().is_err());
        cfg.request_timeout = Duration::from_secs(300);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("VC_DEDUP_CONFIDENCE_THRESHOLD", "0.9");
        std::env::set_var("VC_DEDUP_BATCH_SIZE", "5");
        std::env::set_var("VC_DEDUP_WITHIN_BATCH", "false");
        std::env::set_var("VC_DEDUP_TIMEOUT_SECS", "60");

        let cfg = DeduplicatorConfig::from_env().unwrap();
        assert!((cfg.confidence_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(cfg.batch_size, 5);
        assert!(!cfg.enable_within_batch_dedup);
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));

        std::env::remove_var("VC_DEDUP_CONFIDENCE_THRESHOLD");
        std::env::remove_var("VC_DEDUP_BATCH_SIZE");
        std::env::remove_var("VC_DEDUP_WITHIN_BATCH");
        std::env::remove_var("VC_DEDUP_TIMEOUT_SECS");
    }

    #[test]
    fn env_parse_failure_names_the_key() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("VC_DEDUP_MAX_CANDIDATES", "many");
        let err = DeduplicatorConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidEnv { key, .. } => {
                assert_eq!(key, "VC_DEDUP_MAX_CANDIDATES");
            }
            other => panic!("expected InvalidEnv, got {other:?}"),
        }
        std::env::remove_var("VC_DEDUP_MAX_CANDIDATES");
    }

    #[test]
    fn env_out_of_range_rejected_by_validate() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("VC_DEDUP_LOOKBACK_DAYS", "120");
        let err = DeduplicatorConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::LookbackDays(120)));
        std::env::remove_var("VC_DEDUP_LOOKBACK_DAYS");
    }
}
