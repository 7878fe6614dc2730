//! Logging initialisation for the vigil-coder pipeline crates.
//!
//! Every long-running surface (discovery runs, dedup batches, sandbox
//! sweeps) logs through `tracing`; this crate owns the one place where the
//! subscriber is configured. Output format and filter directives come from a
//! [`TelemetryConfig`], loadable from `VC_LOG_*` environment variables the
//! same way the retention and dedup configs load theirs.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::{fmt as subscriber, EnvFilter};

/// Filter applied when neither `RUST_LOG` nor `VC_LOG` is set: the pipeline
/// crates at `info`, chatty dependencies held back to warnings.
pub const DEFAULT_DIRECTIVES: &str =
    "info,vc_discovery=info,vc_dedup=info,vc_sandbox=info,ignore=warn,reqwest=warn,hyper=warn,rusqlite=warn";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("unknown log format: `{0}` (expected `text` or `json`)")]
    UnknownFormat(String),
    #[error("invalid value for {key}: {message}")]
    InvalidEnv { key: String, message: String },
}

// ---------------------------------------------------------------------------
// LogFormat
// ---------------------------------------------------------------------------

/// Output shape of the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Compact single-line output for terminals.
    #[default]
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "human" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(TelemetryError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

// ---------------------------------------------------------------------------
// TelemetryConfig
// ---------------------------------------------------------------------------

/// How the process logs. Built once at startup and handed to [`init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Stamped on the startup event so multi-process deployments can tell
    /// the discovery daemon from a one-off sweep.
    pub service_name: String,
    pub format: LogFormat,
    /// Filter directives used when `RUST_LOG` is unset.
    pub directives: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "vigil-coder".to_string(),
            format: LogFormat::Text,
            directives: DEFAULT_DIRECTIVES.to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Load overrides from `VC_LOG_FORMAT` (`text` / `json`) and `VC_LOG`
    /// (filter directives). Unset keys keep the defaults; a malformed format
    /// names the offending key.
    pub fn from_env(service_name: impl Into<String>) -> Result<Self, TelemetryError> {
        let mut config = Self::for_service(service_name);
        if let Ok(raw) = std::env::var("VC_LOG_FORMAT") {
            config.format = raw.parse().map_err(|err| match err {
                TelemetryError::UnknownFormat(value) => TelemetryError::InvalidEnv {
                    key: "VC_LOG_FORMAT".to_string(),
                    message: format!("unknown format `{value}`"),
                },
                other => other,
            })?;
        }
        if let Ok(raw) = std::env::var("VC_LOG") {
            config.directives = raw;
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` wins over the configured directives when set. Safe to call
/// multiple times (e.g. in tests) -- subsequent calls are no-ops.
pub fn init(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.directives));

    match config.format {
        // Terminals get compact lines; source locations stay out of the way.
        LogFormat::Text => {
            subscriber()
                .compact()
                .with_env_filter(filter)
                .with_target(true)
                .with_level(true)
                .try_init()
                .ok();
        }
        // Shippers get structured events with the emitting location.
        LogFormat::Json => {
            subscriber()
                .json()
                .with_env_filter(filter)
                .with_current_span(true)
                .with_file(true)
                .with_line_number(true)
                .try_init()
                .ok();
        }
    }

    tracing::info!(
        service = %config.service_name,
        format = %config.format,
        "logging initialised"
    );
}

/// Initialise with defaults for the given service name.
pub fn init_for_service(service_name: &str) {
    init(&TelemetryConfig::for_service(service_name));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
