use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use vc_core::cancel::CancelToken;
use vc_core::issue::DiscoveredIssue;
use vc_core::store::{IssueStore, WorkFilter};

use crate::config::DeduplicatorConfig;
use crate::judge::{DuplicateJudge, JudgeVerdict};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("judge unavailable: {0}")]
    JudgeUnavailable(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("inconsistent deduplication result: {0}")]
    InvalidResult(String),
    #[error("deduplication cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// DuplicateDecision
// ---------------------------------------------------------------------------

/// Outcome of checking one candidate against the persistent store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateDecision {
    pub is_duplicate: bool,
    /// Id of the matching existing issue; set exactly when `is_duplicate`.
    pub duplicate_of: Option<String>,
    pub confidence: f64,
    pub reasoning: String,
    pub compared_count: usize,
}

impl DuplicateDecision {
    fn not_duplicate(reasoning: impl Into<String>, compared_count: usize) -> Self {
        Self {
            is_duplicate: false,
            duplicate_of: None,
            confidence: 0.0,
            reasoning: reasoning.into(),
            compared_count,
        }
    }

    pub fn validate(&self) -> Result<(), DedupError> {
        match (self.is_duplicate, &self.duplicate_of) {
            (true, None) => Err(DedupError::InvalidResult(
                "duplicate decision missing duplicate_of".to_string(),
            )),
            (false, Some(id)) => Err(DedupError::InvalidResult(format!(
                "non-duplicate decision references existing issue {id}"
            ))),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// DedupStats / DeduplicationResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    pub total_candidates: usize,
    pub unique_count: usize,
    pub duplicate_count: usize,
    pub within_batch_count: usize,
    /// Pairwise candidate-vs-issue comparisons performed.
    pub comparisons: usize,
    /// AI requests issued (batched store comparisons count once per batch).
    pub ai_calls: usize,
    pub processing_time_ms: u64,
}

/// Result of deduplicating one batch of candidates.
///
/// Indices in both maps refer to positions in the input candidate slice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationResult {
    pub unique_issues: Vec<DiscoveredIssue>,
    /// Candidate index -> existing issue id (cross-batch duplicates).
    pub duplicate_pairs: BTreeMap<usize, String>,
    /// Duplicate candidate index -> earlier original index.
    pub within_batch_duplicates: BTreeMap<usize, usize>,
    pub stats: DedupStats,
}

impl DeduplicationResult {
    /// Enforce the structural cross-invariants of a well-formed result.
    pub fn validate(&self) -> Result<(), DedupError> {
        let stats = &self.stats;
        if stats.unique_count != self.unique_issues.len() {
            return Err(DedupError::InvalidResult(format!(
                "unique_count {} != unique_issues len {}",
                stats.unique_count,
                self.unique_issues.len()
            )));
        }
        if stats.duplicate_count != self.duplicate_pairs.len() {
            return Err(DedupError::InvalidResult(format!(
                "duplicate_count {} != duplicate_pairs len {}",
                stats.duplicate_count,
                self.duplicate_pairs.len()
            )));
        }
        if stats.within_batch_count != self.within_batch_duplicates.len() {
            return Err(DedupError::InvalidResult(format!(
                "within_batch_count {} != within_batch_duplicates len {}",
                stats.within_batch_count,
                self.within_batch_duplicates.len()
            )));
        }
        let accounted = stats.unique_count + stats.duplicate_count + stats.within_batch_count;
        if stats.total_candidates != accounted {
            return Err(DedupError::InvalidResult(format!(
                "total_candidates {} != unique + duplicate + within_batch {}",
                stats.total_candidates, accounted
            )));
        }

        let total = stats.total_candidates;
        for &index in self.duplicate_pairs.keys() {
            if index >= total {
                return Err(DedupError::InvalidResult(format!(
                    "duplicate index {index} out of range 0..{total}"
                )));
            }
        }
        for (&dup, &original) in &self.within_batch_duplicates {
            if dup >= total || original >= total {
                return Err(DedupError::InvalidResult(format!(
                    "within-batch pair {dup}->{original} out of range 0..{total}"
                )));
            }
            if dup <= original {
                return Err(DedupError::InvalidResult(format!(
                    "within-batch duplicate {dup} must come after its original {original}"
                )));
            }
            if self.duplicate_pairs.contains_key(&original)
                || self.within_batch_duplicates.contains_key(&original)
            {
                return Err(DedupError::InvalidResult(format!(
                    "within-batch original {original} is itself a duplicate"
                )));
            }
            if self.duplicate_pairs.contains_key(&dup) {
                return Err(DedupError::InvalidResult(format!(
                    "candidate {dup} classified as both within-batch and cross-batch duplicate"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AiDeduplicator
// ---------------------------------------------------------------------------

/// Semantic deduplicator backed by an AI judge and the persistent store.
///
/// Single-threaded per call: within one `deduplicate_batch` candidates are
/// processed in index order so within-batch deduplication sees a
/// deterministic earlier-vs-later relation. Distinct batches may run
/// concurrently against the same judge and store.
#[derive(Debug)]
pub struct AiDeduplicator {
    judge: Arc<dyn DuplicateJudge>,
    store: Arc<dyn IssueStore>,
    config: DeduplicatorConfig,
}

impl AiDeduplicator {
    /// Construct a deduplicator, validating the config exactly once.
    pub fn new(
        judge: Arc<dyn DuplicateJudge>,
        store: Arc<dyn IssueStore>,
        config: DeduplicatorConfig,
    ) -> Result<Self, DedupError> {
        config
            .validate()
            .map_err(|e| DedupError::InvalidArg(e.to_string()))?;
        Ok(Self {
            judge,
            store,
            config,
        })
    }

    pub fn config(&self) -> &DeduplicatorConfig {
        &self.config
    }

    /// Check one candidate against recent existing issues.
    pub async fn check_duplicate(
        &self,
        cancel: &CancelToken,
        candidate: &DiscoveredIssue,
    ) -> Result<DuplicateDecision, DedupError> {
        self.check_duplicate_excluding(cancel, candidate, None).await
    }

    /// As [`check_duplicate`](Self::check_duplicate) but skipping one
    /// existing issue id — used when the candidate is itself a persisted
    /// issue (sandbox merge-back) so it is never compared against itself.
    pub async fn check_duplicate_excluding(
        &self,
        cancel: &CancelToken,
        candidate: &DiscoveredIssue,
        exclude_id: Option<&str>,
    ) -> Result<DuplicateDecision, DedupError> {
        candidate
            .validate()
            .map_err(|e| DedupError::InvalidArg(e.to_string()))?;

        if candidate.title.chars().count() < self.config.min_title_length {
            return Ok(DuplicateDecision::not_duplicate(
                "title too short for reliable comparison",
                0,
            ));
        }

        let filter = WorkFilter {
            status: None,
            include_closed: self.config.include_closed_issues,
            updated_since: Some(
                Utc::now() - ChronoDuration::days(i64::from(self.config.lookback_days)),
            ),
            limit: self.config.max_candidates,
        };
        let mut existing = match self.store.get_ready_work(&filter).await {
            Ok(issues) => issues,
            Err(err) if self.config.fail_open => {
                warn!(error = %err, "store lookup failed; failing open as not-duplicate");
                return Ok(DuplicateDecision::not_duplicate(
                    "store unavailable; filed without deduplication",
                    0,
                ));
            }
            Err(err) => return Err(DedupError::StoreUnavailable(err.to_string())),
        };
        if let Some(skip) = exclude_id {
            existing.retain(|issue| issue.id != skip);
        }
        if existing.is_empty() {
            return Ok(DuplicateDecision::not_duplicate("no existing issues to compare", 0));
        }

        let mut compared_count = 0usize;
        let mut best: Option<JudgeVerdict> = None;

        for chunk in existing.chunks(self.config.batch_size) {
            if cancel.is_cancelled() {
                return Err(DedupError::Cancelled);
            }
            let response = match self
                .judge
                .check_issue_duplicate_batch(candidate, chunk)
                .await
            {
                Ok(resp) => resp,
                Err(err) if self.config.fail_open => {
                    warn!(error = %err, batch = chunk.len(), "judge batch failed; skipping");
                    continue;
                }
                Err(err) => return Err(DedupError::JudgeUnavailable(err.to_string())),
            };

            for verdict in response.results {
                compared_count += 1;
                if verdict.is_duplicate && verdict.confidence >= self.config.confidence_threshold {
                    debug!(
                        candidate = %candidate.title,
                        existing = %verdict.existing_issue_id,
                        confidence = verdict.confidence,
                        "duplicate found"
                    );
                    return Ok(DuplicateDecision {
                        is_duplicate: true,
                        duplicate_of: Some(verdict.existing_issue_id),
                        confidence: verdict.confidence,
                        reasoning: verdict.reasoning,
                        compared_count,
                    });
                }
                let better = best
                    .as_ref()
                    .is_none_or(|b| verdict.confidence > b.confidence);
                if verdict.is_duplicate && better {
                    best = Some(verdict);
                }
            }
        }

        Ok(match best {
            Some(near) => DuplicateDecision {
                is_duplicate: false,
                duplicate_of: None,
                confidence: near.confidence,
                reasoning: format!("best match below threshold: {}", near.reasoning),
                compared_count,
            },
            None => DuplicateDecision::not_duplicate(
                format!("no duplicates among {compared_count} existing issues"),
                compared_count,
            ),
        })
    }

    /// Deduplicate a batch of candidates against each other and the store.
    ///
    /// Candidates are processed in order. A candidate judged equivalent to an
    /// earlier still-alive candidate is recorded in
    /// `within_batch_duplicates` and skips the store check entirely.
    pub async fn deduplicate_batch(
        &self,
        cancel: &CancelToken,
        candidates: &[DiscoveredIssue],
    ) -> Result<DeduplicationResult, DedupError> {
        let started = Instant::now();

        let mut result = DeduplicationResult::default();
        result.stats.total_candidates = candidates.len();
        if candidates.is_empty() {
            result.stats.processing_time_ms = started.elapsed().as_millis() as u64;
            return Ok(result);
        }

        for candidate in candidates {
            candidate
                .validate()
                .map_err(|e| DedupError::InvalidArg(e.to_string()))?;
        }

        for (i, candidate) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(DedupError::Cancelled);
            }

            let mut classified = false;
            if self.config.enable_within_batch_dedup {
                for j in 0..i {
                    let alive = !result.duplicate_pairs.contains_key(&j)
                        && !result.within_batch_duplicates.contains_key(&j);
                    if !alive {
                        continue;
                    }
                    result.stats.comparisons += 1;
                    result.stats.ai_calls += 1;
                    match self
                        .judge
                        .check_issue_duplicate(candidate, &candidates[j])
                        .await
                    {
                        Ok(verdict)
                            if verdict.is_duplicate
                                && verdict.confidence >= self.config.confidence_threshold =>
                        {
                            debug!(dup = i, original = j, "within-batch duplicate");
                            result.within_batch_duplicates.insert(i, j);
                            classified = true;
                            break;
                        }
                        Ok(_) => {}
                        Err(err) if self.config.fail_open => {
                            warn!(error = %err, "pairwise judge failed; treating as distinct");
                        }
                        Err(err) => {
                            return Err(DedupError::JudgeUnavailable(err.to_string()));
                        }
                    }
                }
            }
            if classified {
                continue;
            }

            match self.check_duplicate(cancel, candidate).await {
                Ok(decision) => {
                    result.stats.comparisons += decision.compared_count;
                    result.stats.ai_calls +=
                        decision.compared_count.div_ceil(self.config.batch_size);
                    match (decision.is_duplicate, decision.duplicate_of) {
                        (true, Some(existing_id)) => {
                            result.duplicate_pairs.insert(i, existing_id);
                        }
                        _ => result.unique_issues.push(candidate.clone()),
                    }
                }
                Err(DedupError::Cancelled) => return Err(DedupError::Cancelled),
                Err(err) if self.config.fail_open => {
                    warn!(error = %err, "check_duplicate failed; treating candidate as unique");
                    result.unique_issues.push(candidate.clone());
                }
                Err(err) => return Err(err),
            }
        }

        result.stats.unique_count = result.unique_issues.len();
        result.stats.duplicate_count = result.duplicate_pairs.len();
        result.stats.within_batch_count = result.within_batch_duplicates.len();
        result.stats.processing_time_ms = started.elapsed().as_millis() as u64;

        result.validate()?;
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::{BatchResponse, JudgeError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vc_core::store::{Issue, IssueEvent, IssueType, StoreError};

    // -- Mock store --

    struct MockStore {
        issues: Vec<Issue>,
        fail_lookup: bool,
    }

    impl MockStore {
        fn empty() -> Self {
            Self {
                issues: Vec::new(),
                fail_lookup: false,
            }
        }

        fn with_issues(issues: Vec<Issue>) -> Self {
            Self {
                issues,
                fail_lookup: false,
            }
        }

        fn failing() -> Self {
            Self {
                issues: Vec::new(),
                fail_lookup: true,
            }
        }
    }

    #[async_trait]
    impl IssueStore for MockStore {
        async fn get_ready_work(&self, filter: &WorkFilter) -> Result<Vec<Issue>, StoreError> {
            if self.fail_lookup {
                return Err(StoreError::Unavailable("db offline".to_string()));
            }
            let mut issues = self.issues.clone();
            if filter.limit > 0 {
                issues.truncate(filter.limit);
            }
            Ok(issues)
        }

        async fn get_issue(&self, id: &str) -> Result<Option<Issue>, StoreError> {
            Ok(self.issues.iter().find(|i| i.id == id).cloned())
        }

        async fn list_issues(&self) -> Result<Vec<Issue>, StoreError> {
            Ok(self.issues.clone())
        }

        async fn create_issue(&self, _issue: &Issue, _actor: &str) -> Result<String, StoreError> {
            unimplemented!("not used in dedup tests")
        }

        async fn add_label(&self, _id: &str, _label: &str, _actor: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn create_event(&self, _event: &IssueEvent) -> Result<(), StoreError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    // -- Mock judge --

    /// Judge that reports duplicates for configured (candidate, target) title
    /// pairs and counts how many calls it received.
    struct MockJudge {
        /// (candidate title, existing/other title) pairs judged duplicates.
        duplicate_pairs: Vec<(String, String)>,
        confidence: f64,
        fail_always: bool,
        batch_calls: AtomicUsize,
        pair_calls: AtomicUsize,
    }

    impl MockJudge {
        fn never_duplicate() -> Self {
            Self::with_pairs(Vec::new())
        }

        fn with_pairs(pairs: Vec<(&str, &str)>) -> Self {
            Self {
                duplicate_pairs: pairs
                    .into_iter()
                    .map(|(a, b)| (a.to_string(), b.to_string()))
                    .collect(),
                confidence: 0.9,
                fail_always: false,
                batch_calls: AtomicUsize::new(0),
                pair_calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            let mut judge = Self::never_duplicate();
            judge.fail_always = true;
            judge
        }

        fn is_pair(&self, a: &str, b: &str) -> bool {
            self.duplicate_pairs
                .iter()
                .any(|(x, y)| x == a && y == b)
        }
    }

    #[async_trait]
    impl DuplicateJudge for MockJudge {
        async fn check_issue_duplicate_batch(
            &self,
            candidate: &DiscoveredIssue,
            existing: &[Issue],
        ) -> Result<BatchResponse, JudgeError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_always {
                return Err(JudgeError::Http("judge offline".to_string()));
            }
            Ok(BatchResponse {
                results: existing
                    .iter()
                    .map(|issue| JudgeVerdict {
                        existing_issue_id: issue.id.clone(),
                        is_duplicate: self.is_pair(&candidate.title, &issue.title),
                        confidence: if self.is_pair(&candidate.title, &issue.title) {
                            self.confidence
                        } else {
                            0.1
                        },
                        reasoning: "mock".to_string(),
                    })
                    .collect(),
            })
        }

        async fn check_issue_duplicate(
            &self,
            candidate: &DiscoveredIssue,
            other: &DiscoveredIssue,
        ) -> Result<JudgeVerdict, JudgeError> {
            self.pair_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_always {
                return Err(JudgeError::Http("judge offline".to_string()));
            }
            let dup = self.is_pair(&candidate.title, &other.title);
            Ok(JudgeVerdict {
                existing_issue_id: String::new(),
                is_duplicate: dup,
                confidence: if dup { self.confidence } else { 0.1 },
                reasoning: "mock".to_string(),
            })
        }
    }

    fn candidate(title: &str) -> DiscoveredIssue {
        let mut issue = DiscoveredIssue::new(title, format!("description of {title}"));
        issue.discovered_by = "test-worker".to_string();
        issue
    }

    fn existing(id: &str, title: &str) -> Issue {
        let mut issue = Issue::new(title, IssueType::Task);
        issue.id = id.to_string();
        issue
    }

    fn make_dedup(judge: MockJudge, store: MockStore) -> AiDeduplicator {
        AiDeduplicator::new(
            Arc::new(judge),
            Arc::new(store),
            DeduplicatorConfig::default(),
        )
        .unwrap()
    }

    // -- Construction --

    #[test]
    fn new_rejects_invalid_config() {
        let mut cfg = DeduplicatorConfig::default();
        cfg.batch_size = 0;
        let err = AiDeduplicator::new(
            Arc::new(MockJudge::never_duplicate()),
            Arc::new(MockStore::empty()),
            cfg,
        )
        .unwrap_err();
        assert!(matches!(err, DedupError::InvalidArg(_)));
    }

    // -- DuplicateDecision invariant --

    #[test]
    fn decision_invariant_enforced() {
        let mut decision = DuplicateDecision::not_duplicate("ok", 3);
        assert!(decision.validate().is_ok());

        decision.is_duplicate = true;
        assert!(decision.validate().is_err());

        decision.duplicate_of = Some("vc-1".to_string());
        assert!(decision.validate().is_ok());

        decision.is_duplicate = false;
        assert!(decision.validate().is_err());
    }

    // -- check_duplicate --

    #[tokio::test]
    async fn short_title_skips_dedup() {
        let dedup = make_dedup(MockJudge::never_duplicate(), MockStore::empty());
        let decision = dedup
            .check_duplicate(&CancelToken::new(), &candidate("tiny"))
            .await
            .unwrap();
        assert!(!decision.is_duplicate);
        assert_eq!(decision.compared_count, 0);
        assert_eq!(decision.confidence, 0.0);
        assert!(decision.reasoning.contains("title too short"));
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let dedup = make_dedup(MockJudge::never_duplicate(), MockStore::failing());
        let decision = dedup
            .check_duplicate(&CancelToken::new(), &candidate("a perfectly long title"))
            .await
            .unwrap();
        assert!(!decision.is_duplicate);
        assert_eq!(decision.compared_count, 0);
    }

    #[tokio::test]
    async fn store_failure_propagates_when_fail_closed() {
        let mut cfg = DeduplicatorConfig::default();
        cfg.fail_open = false;
        let dedup = AiDeduplicator::new(
            Arc::new(MockJudge::never_duplicate()),
            Arc::new(MockStore::failing()),
            cfg,
        )
        .unwrap();
        let err = dedup
            .check_duplicate(&CancelToken::new(), &candidate("a perfectly long title"))
            .await
            .unwrap_err();
        assert!(matches!(err, DedupError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn duplicate_found_short_circuits() {
        let store = MockStore::with_issues(vec![
            existing("vc-1", "Fetch panics on 404"),
            existing("vc-2", "Missing retry logic in fetch"),
        ]);
        let judge = MockJudge::with_pairs(vec![(
            "Missing retry logic in fetch client",
            "Missing retry logic in fetch",
        )]);
        let dedup = make_dedup(judge, store);

        let decision = dedup
            .check_duplicate(
                &CancelToken::new(),
                &candidate("Missing retry logic in fetch client"),
            )
            .await
            .unwrap();
        assert!(decision.is_duplicate);
        assert_eq!(decision.duplicate_of.as_deref(), Some("vc-2"));
        assert!(decision.confidence >= 0.85);
        decision.validate().unwrap();
    }

    #[tokio::test]
    async fn below_threshold_match_is_not_duplicate() {
        let store = MockStore::with_issues(vec![existing("vc-1", "Fetch panics on 404")]);
        let mut judge = MockJudge::with_pairs(vec![(
            "Fetch panics on 404 sometimes",
            "Fetch panics on 404",
        )]);
        judge.confidence = 0.5; // below the 0.85 threshold
        let dedup = make_dedup(judge, store);

        let decision = dedup
            .check_duplicate(&CancelToken::new(), &candidate("Fetch panics on 404 sometimes"))
            .await
            .unwrap();
        assert!(!decision.is_duplicate);
        assert!(decision.duplicate_of.is_none());
        assert!((decision.confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(decision.compared_count, 1);
    }

    #[tokio::test]
    async fn excluded_id_is_never_compared() {
        let store = MockStore::with_issues(vec![existing("vc-1", "Identical title here")]);
        let judge = MockJudge::with_pairs(vec![("Identical title here", "Identical title here")]);
        let dedup = make_dedup(judge, store);

        let decision = dedup
            .check_duplicate_excluding(
                &CancelToken::new(),
                &candidate("Identical title here"),
                Some("vc-1"),
            )
            .await
            .unwrap();
        assert!(!decision.is_duplicate);
        assert_eq!(decision.compared_count, 0);
    }

    #[tokio::test]
    async fn cancelled_check_aborts() {
        let store = MockStore::with_issues(vec![existing("vc-1", "Some other issue title")]);
        let dedup = make_dedup(MockJudge::never_duplicate(), store);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = dedup
            .check_duplicate(&cancel, &candidate("a perfectly long title"))
            .await
            .unwrap_err();
        assert!(matches!(err, DedupError::Cancelled));
    }

    // -- deduplicate_batch --

    #[tokio::test]
    async fn empty_batch_returns_zeroed_result() {
        let dedup = make_dedup(MockJudge::never_duplicate(), MockStore::empty());
        let result = dedup
            .deduplicate_batch(&CancelToken::new(), &[])
            .await
            .unwrap();
        assert!(result.unique_issues.is_empty());
        assert_eq!(result.stats.total_candidates, 0);
        assert_eq!(result.stats.ai_calls, 0);
        result.validate().unwrap();
    }

    #[tokio::test]
    async fn invalid_candidate_fails_whole_batch() {
        let dedup = make_dedup(MockJudge::never_duplicate(), MockStore::empty());
        let mut bad = candidate("has a valid title length");
        bad.priority = 9;
        let err = dedup
            .deduplicate_batch(&CancelToken::new(), &[candidate("fine candidate title"), bad])
            .await
            .unwrap_err();
        assert!(matches!(err, DedupError::InvalidArg(_)));
    }

    #[tokio::test]
    async fn within_batch_duplicates_collapse() {
        // Five candidates A,B,C,D,E where B≈A and D≈C; all novel vs the store.
        let judge = Arc::new(MockJudge::with_pairs(vec![
            ("candidate B duplicate of A", "candidate A original title"),
            ("candidate D duplicate of C", "candidate C original title"),
        ]));
        let dedup = AiDeduplicator::new(
            judge.clone(),
            Arc::new(MockStore::empty()),
            DeduplicatorConfig::default(),
        )
        .unwrap();

        let batch = vec![
            candidate("candidate A original title"),
            candidate("candidate B duplicate of A"),
            candidate("candidate C original title"),
            candidate("candidate D duplicate of C"),
            candidate("candidate E novel title"),
        ];
        let result = dedup
            .deduplicate_batch(&CancelToken::new(), &batch)
            .await
            .unwrap();

        assert_eq!(result.stats.total_candidates, 5);
        assert_eq!(result.unique_issues.len(), 3);
        let unique_titles: Vec<&str> = result
            .unique_issues
            .iter()
            .map(|i| i.title.as_str())
            .collect();
        assert_eq!(
            unique_titles,
            vec![
                "candidate A original title",
                "candidate C original title",
                "candidate E novel title"
            ]
        );
        assert_eq!(
            result.within_batch_duplicates,
            BTreeMap::from([(1, 0), (3, 2)])
        );
        assert!(result.duplicate_pairs.is_empty());
        // Pairwise calls: B:1 (vs A), C:1 (vs A), D:2 (vs A, C), E:2 (vs A, C).
        assert_eq!(judge.pair_calls.load(Ordering::SeqCst), 6);
        assert_eq!(result.stats.ai_calls, 6);
        result.validate().unwrap();
    }

    #[tokio::test]
    async fn within_batch_skips_dead_originals() {
        // C matches both A and B; B is already a duplicate of A, so C must be
        // recorded against A (the only still-alive original).
        let judge = MockJudge::with_pairs(vec![
            ("candidate B echoes candidate A", "candidate A original title"),
            ("candidate C echoes them all", "candidate A original title"),
            ("candidate C echoes them all", "candidate B echoes candidate A"),
        ]);
        let dedup = make_dedup(judge, MockStore::empty());

        let batch = vec![
            candidate("candidate A original title"),
            candidate("candidate B echoes candidate A"),
            candidate("candidate C echoes them all"),
        ];
        let result = dedup
            .deduplicate_batch(&CancelToken::new(), &batch)
            .await
            .unwrap();

        assert_eq!(
            result.within_batch_duplicates,
            BTreeMap::from([(1, 0), (2, 0)])
        );
        assert_eq!(result.unique_issues.len(), 1);
        result.validate().unwrap();
    }

    #[tokio::test]
    async fn judge_outage_fails_open_and_files_everything() {
        let store = MockStore::with_issues(vec![existing("vc-1", "Existing issue in store")]);
        let dedup = make_dedup(MockJudge::failing(), store);

        let batch = vec![
            candidate("first candidate long title"),
            candidate("second candidate long title"),
            candidate("third candidate long title"),
        ];
        let result = dedup
            .deduplicate_batch(&CancelToken::new(), &batch)
            .await
            .unwrap();

        assert_eq!(result.unique_issues.len(), 3);
        assert!(result.duplicate_pairs.is_empty());
        assert!(result.within_batch_duplicates.is_empty());
        result.validate().unwrap();
    }

    #[tokio::test]
    async fn cross_batch_duplicates_recorded_with_existing_id() {
        let store = MockStore::with_issues(vec![existing("vc-42", "Known flaky test issue")]);
        let judge = MockJudge::with_pairs(vec![(
            "Known flaky test issue again",
            "Known flaky test issue",
        )]);
        let mut cfg = DeduplicatorConfig::default();
        cfg.enable_within_batch_dedup = false;
        let dedup = AiDeduplicator::new(Arc::new(judge), Arc::new(store), cfg).unwrap();

        let batch = vec![
            candidate("Known flaky test issue again"),
            candidate("A completely novel finding"),
        ];
        let result = dedup
            .deduplicate_batch(&CancelToken::new(), &batch)
            .await
            .unwrap();

        assert_eq!(result.duplicate_pairs, BTreeMap::from([(0, "vc-42".to_string())]));
        assert_eq!(result.unique_issues.len(), 1);
        assert_eq!(result.stats.duplicate_count, 1);
        result.validate().unwrap();
    }

    #[tokio::test]
    async fn ai_call_accounting_uses_batch_ceiling() {
        // 25 existing issues with batch_size 10 => 3 judge calls per candidate.
        let issues: Vec<Issue> = (0..25)
            .map(|i| existing(&format!("vc-{i}"), &format!("Existing issue number {i}")))
            .collect();
        let store = MockStore::with_issues(issues);
        let mut cfg = DeduplicatorConfig::default();
        cfg.enable_within_batch_dedup = false;
        let judge = Arc::new(MockJudge::never_duplicate());
        let dedup = AiDeduplicator::new(judge.clone(), Arc::new(store), cfg).unwrap();

        let result = dedup
            .deduplicate_batch(&CancelToken::new(), &[candidate("novel candidate title")])
            .await
            .unwrap();
        assert_eq!(result.stats.comparisons, 25);
        assert_eq!(result.stats.ai_calls, 3);
        assert_eq!(judge.batch_calls.load(Ordering::SeqCst), 3);
        result.validate().unwrap();
    }

    // -- result validation --

    #[test]
    fn validate_rejects_count_mismatch() {
        let mut result = DeduplicationResult::default();
        result.stats.total_candidates = 1;
        assert!(result.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_indices() {
        let mut result = DeduplicationResult::default();
        result.stats.total_candidates = 2;
        result.stats.unique_count = 1;
        result.stats.duplicate_count = 1;
        result.unique_issues.push(candidate("one valid candidate"));
        result.duplicate_pairs.insert(5, "vc-1".to_string());
        let err = result.validate().unwrap_err();
        assert!(matches!(err, DedupError::InvalidResult(_)));
    }

    #[test]
    fn validate_rejects_original_that_is_also_duplicate() {
        let mut result = DeduplicationResult::default();
        result.stats.total_candidates = 3;
        result.stats.duplicate_count = 1;
        result.stats.within_batch_count = 2;
        // unique_count 0, 1 cross + 2 within = 3 total. Original 1 appears in
        // within_batch values while also being a within-batch duplicate key.
        result.duplicate_pairs.insert(0, "vc-1".to_string());
        result.within_batch_duplicates.insert(1, 0);
        result.within_batch_duplicates.insert(2, 1);
        let err = result.validate().unwrap_err();
        assert!(matches!(err, DedupError::InvalidResult(_)));
    }

    #[test]
    fn validate_rejects_inverted_within_batch_order() {
        let mut result = DeduplicationResult::default();
        result.stats.total_candidates = 2;
        result.stats.unique_count = 1;
        result.stats.within_batch_count = 1;
        result.unique_issues.push(candidate("a valid unique candidate"));
        result.within_batch_duplicates.insert(0, 1);
        assert!(result.validate().is_err());
    }
}
