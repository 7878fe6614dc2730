use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use vc_core::issue::DiscoveredIssue;
use vc_core::store::Issue;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the AI duplicate judge. All of them are recoverable by the
/// caller under the fail-open policy.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for JudgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            JudgeError::Timeout
        } else {
            JudgeError::Http(err.to_string())
        }
    }
}

impl JudgeError {
    /// Transient failures worth retrying.
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            JudgeError::Timeout
                | JudgeError::RateLimited { .. }
                | JudgeError::Api { status: 500..=599, .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Verdict types
// ---------------------------------------------------------------------------

/// The judge's verdict on one candidate-vs-existing comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub existing_issue_id: String,
    pub is_duplicate: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// One verdict per existing issue in the compared batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<JudgeVerdict>,
}

// ---------------------------------------------------------------------------
// DuplicateJudge trait
// ---------------------------------------------------------------------------

/// External AI judge deciding semantic equivalence between issues.
///
/// Implementations must be safe for concurrent use; the deduplicator may run
/// several batches against the same judge.
#[async_trait]
pub trait DuplicateJudge: Send + Sync {
    /// Compare one candidate against a batch of existing issues in a single
    /// request, returning one verdict per existing issue.
    async fn check_issue_duplicate_batch(
        &self,
        candidate: &DiscoveredIssue,
        existing: &[Issue],
    ) -> Result<BatchResponse, JudgeError>;

    /// Degraded single-pair form used for within-batch comparisons.
    async fn check_issue_duplicate(
        &self,
        candidate: &DiscoveredIssue,
        other: &DiscoveredIssue,
    ) -> Result<JudgeVerdict, JudgeError>;
}

impl std::fmt::Debug for dyn DuplicateJudge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateJudge").finish()
    }
}

// ---------------------------------------------------------------------------
// AnthropicJudge
// ---------------------------------------------------------------------------

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Duplicate judge backed by the Anthropic Messages API.
pub struct AnthropicJudge {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl AnthropicJudge {
    /// Create a judge with the given API key and per-request timeout.
    pub fn new(
        api_key: impl Into<String>,
        request_timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, JudgeError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| JudgeError::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_retries,
        })
    }

    /// Override the base URL (useful for testing with a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Build the user prompt for a candidate-vs-batch comparison. The judge
    /// is asked for strict JSON so the response can be parsed mechanically.
    fn batch_prompt(candidate: &DiscoveredIssue, existing: &[Issue]) -> String {
        let mut prompt = String::from(
            "You compare a candidate software issue against existing issues and decide, \
             for each existing issue, whether the candidate describes the same underlying \
             problem.\n\nCandidate issue:\n",
        );
        prompt.push_str(&format!(
            "  title: {}\n  description: {}\n  category: {}\n",
            candidate.title, candidate.description, candidate.category
        ));
        if let Some(path) = &candidate.file_path {
            prompt.push_str(&format!("  file: {path}\n"));
        }
        prompt.push_str("\nExisting issues:\n");
        for issue in existing {
            prompt.push_str(&format!(
                "  - id: {}\n    title: {}\n    description: {}\n",
                issue.id, issue.title, issue.description
            ));
        }
        prompt.push_str(
            "\nRespond with a JSON array only, one element per existing issue, each of the \
             form {\"existing_issue_id\": \"...\", \"is_duplicate\": true|false, \
             \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}. No prose.",
        );
        prompt
    }

    fn pair_prompt(candidate: &DiscoveredIssue, other: &DiscoveredIssue) -> String {
        format!(
            "Decide whether these two software issues describe the same underlying problem.\n\n\
             Issue A:\n  title: {}\n  description: {}\n\n\
             Issue B:\n  title: {}\n  description: {}\n\n\
             Respond with a single JSON object only: {{\"is_duplicate\": true|false, \
             \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}}. No prose.",
            candidate.title, candidate.description, other.title, other.description
        )
    }

    async fn complete(&self, prompt: String) -> Result<String, JudgeError> {
        let mut attempt: u32 = 0;
        loop {
            match self.complete_once(&prompt).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                    warn!(error = %err, attempt, "judge request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn complete_once(&self, prompt: &str) -> Result<String, JudgeError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": 1024,
            "temperature": 0.0,
            "messages": [{"role": "user", "content": prompt}],
        });
        let url = format!("{}/v1/messages", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(JudgeError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(JudgeError::Api { status, message });
        }

        #[derive(Deserialize)]
        struct ApiResponse {
            content: Vec<ContentBlock>,
        }
        #[derive(Deserialize)]
        struct ContentBlock {
            text: Option<String>,
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| JudgeError::Parse(e.to_string()))?;
        Ok(api_resp
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join(""))
    }
}

/// Strip a Markdown code fence if the model wrapped its JSON in one.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim_start().strip_suffix("```").unwrap_or(inner).trim()
}

#[async_trait]
impl DuplicateJudge for AnthropicJudge {
    async fn check_issue_duplicate_batch(
        &self,
        candidate: &DiscoveredIssue,
        existing: &[Issue],
    ) -> Result<BatchResponse, JudgeError> {
        if existing.is_empty() {
            return Ok(BatchResponse::default());
        }
        let prompt = Self::batch_prompt(candidate, existing);
        let text = self.complete(prompt).await?;
        let results: Vec<JudgeVerdict> = serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| JudgeError::Parse(format!("bad batch verdict: {e}")))?;
        debug!(
            candidate = %candidate.title,
            compared = existing.len(),
            verdicts = results.len(),
            "judge batch complete"
        );
        Ok(BatchResponse { results })
    }

    async fn check_issue_duplicate(
        &self,
        candidate: &DiscoveredIssue,
        other: &DiscoveredIssue,
    ) -> Result<JudgeVerdict, JudgeError> {
        let prompt = Self::pair_prompt(candidate, other);
        let text = self.complete(prompt).await?;

        #[derive(Deserialize)]
        struct PairVerdict {
            is_duplicate: bool,
            confidence: f64,
            #[serde(default)]
            reasoning: String,
        }
        let verdict: PairVerdict = serde_json::from_str(strip_code_fence(&text))
            .map_err(|e| JudgeError::Parse(format!("bad pair verdict: {e}")))?;
        Ok(JudgeVerdict {
            existing_issue_id: String::new(),
            is_duplicate: verdict.is_duplicate,
            confidence: verdict.confidence,
            reasoning: verdict.reasoning,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use vc_core::store::IssueType;

    fn candidate() -> DiscoveredIssue {
        let mut issue = DiscoveredIssue::new("Missing error handling in fetch", "details");
        issue.discovered_by = "todo-scan".to_string();
        issue
    }

    #[test]
    fn batch_prompt_lists_all_existing_issues() {
        let existing = vec![
            Issue::new("Fetch panics on 404", IssueType::Bug),
            Issue::new("Add retry to fetch", IssueType::Feature),
        ];
        let prompt = AnthropicJudge::batch_prompt(&candidate(), &existing);
        assert!(prompt.contains("Missing error handling in fetch"));
        assert!(prompt.contains("Fetch panics on 404"));
        assert!(prompt.contains("Add retry to fetch"));
        assert!(prompt.contains("JSON array"));
    }

    #[test]
    fn pair_prompt_mentions_both_issues() {
        let other = DiscoveredIssue::new("Fetch lacks error handling", "same thing");
        let prompt = AnthropicJudge::pair_prompt(&candidate(), &other);
        assert!(prompt.contains("Issue A"));
        assert!(prompt.contains("Issue B"));
        assert!(prompt.contains("Fetch lacks error handling"));
    }

    #[test]
    fn strip_code_fence_variants() {
        assert_eq!(strip_code_fence("[]"), "[]");
        assert_eq!(strip_code_fence("```json\n[]\n```"), "[]");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  [1,2]  "), "[1,2]");
    }

    #[test]
    fn verdict_parses_from_judge_json() {
        let text = r#"[{"existing_issue_id":"vc-1","is_duplicate":true,"confidence":0.92,"reasoning":"same fix"}]"#;
        let verdicts: Vec<JudgeVerdict> = serde_json::from_str(text).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert!(verdicts[0].is_duplicate);
        assert!((verdicts[0].confidence - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn retryable_classification() {
        assert!(JudgeError::Timeout.is_retryable());
        assert!(JudgeError::RateLimited {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(JudgeError::Api {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!JudgeError::Api {
            status: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!JudgeError::Parse("x".into()).is_retryable());
    }
}
