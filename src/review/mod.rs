//! PR Review Controller (C13, spec.md §4.11). At-most-one concurrent
//! review per pull request, stale-review hiding, standardized
//! scoring+comment submission. Grounded in the Aggregation Engine's
//! spawn-a-task-per-key shape (`notifications::aggregator`), reusing its
//! "insert key, spawn, always remove key" discipline.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;

use crate::codehost::client::{CodeHostClient, PrFile, ReviewEvent, ReviewLineComment};
use crate::errors::RemoteError;
use crate::llm::LlmProvider;
use crate::models::{
    Message, MessageRole, NotificationRecord, NotificationTarget, RepositoryConfig, ReviewComment,
    ReviewResult, ReviewSeverity, ReviewStatus,
};
use crate::notifications::aggregator::AggregationEngine;
use crate::notifications::sender::ChatAdapter;

/// Max size of `active_reviews` (spec.md §4.11). Per Open Question (c)'s
/// redesign guidance, this bounds the set by refusing *new* entries at
/// capacity rather than FIFO-evicting a review that is still live — a live
/// key is only ever removed by its own task completing.
const MAX_ACTIVE_REVIEWS: usize = 100;
const MAX_REVIEW_FILES: usize = 10;
const MAX_PATCH_CHARS: usize = 2000;
const MAX_REVIEW_ATTEMPTS: u32 = 3;
const REVIEW_TIMEOUT: Duration = Duration::from_secs(180);
const MAX_SUBMITTED_COMMENTS: usize = 10;

pub struct ReviewController<A: ChatAdapter> {
    active_reviews: Mutex<HashSet<String>>,
    code_host: Arc<dyn CodeHostClient>,
    llm: Arc<dyn LlmProvider>,
    aggregation: Arc<AggregationEngine<A>>,
    /// Mirrors spec.md §4.11 step 2's "tool layer not ready" guard. Always
    /// `true` once the orchestrator has a registry and an LLM provider
    /// wired; kept settable so tests can exercise the refusal path.
    tool_layer_ready: bool,
}

impl<A: ChatAdapter + 'static> ReviewController<A> {
    pub fn new(
        code_host: Arc<dyn CodeHostClient>,
        llm: Arc<dyn LlmProvider>,
        aggregation: Arc<AggregationEngine<A>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            active_reviews: Mutex::new(HashSet::new()),
            code_host,
            llm,
            aggregation,
            tool_layer_ready: true,
        })
    }

    pub fn active_review_count(&self) -> usize {
        self.active_reviews.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Entry point: `pull_request.review_requested` targeting the bot
    /// (spec.md §4.11's Trigger clause). Fire-and-forget: spawns the
    /// review task and returns immediately.
    pub fn handle_review_requested(
        self: &Arc<Self>,
        payload: &serde_json::Value,
        repo: &str,
        repo_config: &RepositoryConfig,
    ) {
        let Some(bot) = repo_config.review_bot_username.as_deref() else { return };
        if payload.get("action").and_then(|v| v.as_str()) != Some("review_requested") {
            return;
        }
        let requested: Vec<&str> = payload
            .get("pull_request")
            .and_then(|pr| pr.get("requested_reviewers"))
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|r| r.get("login").and_then(|v| v.as_str())).collect())
            .unwrap_or_default();
        if !requested.contains(&bot) {
            return;
        }
        let Some(number) = payload.get("pull_request").and_then(|pr| pr.get("number")).and_then(|v| v.as_u64()) else {
            return;
        };

        let key = format!("{repo}#{number}");
        {
            let mut active = self.active_reviews.lock().unwrap_or_else(|e| e.into_inner());
            if active.contains(&key) {
                return;
            }
            if !self.tool_layer_ready {
                let controller = Arc::clone(self);
                let repo = repo.to_string();
                tokio::spawn(async move {
                    controller.emit_refusal(&repo, number, "AI tool layer not ready").await;
                });
                return;
            }
            if active.len() >= MAX_ACTIVE_REVIEWS {
                tracing::warn!(%key, "active_reviews at capacity, dropping review trigger");
                return;
            }
            active.insert(key.clone());
        }

        let controller = Arc::clone(self);
        let repo = repo.to_string();
        let targets = repo_config.qq_target_ids.clone();
        tokio::spawn(async move {
            controller.run_review(key, repo, number, targets).await;
        });
    }

    /// `pull_request.review_request_removed` targeting the bot (spec.md
    /// §4.3). The remote review request is already gone by the time this
    /// event arrives; cancellation here means clearing local tracking so a
    /// stale key doesn't block a future `review_requested` for the same PR
    /// (spec.md §4.11's cancellation note).
    pub fn handle_review_request_removed(
        self: &Arc<Self>,
        payload: &serde_json::Value,
        repo: &str,
        repo_config: &RepositoryConfig,
    ) {
        let Some(bot) = repo_config.review_bot_username.as_deref() else { return };
        if payload.get("action").and_then(|v| v.as_str()) != Some("review_request_removed") {
            return;
        }
        let removed_login = payload
            .get("requested_reviewer")
            .and_then(|r| r.get("login"))
            .and_then(|v| v.as_str());
        if removed_login != Some(bot) {
            return;
        }
        let Some(number) = payload.get("pull_request").and_then(|pr| pr.get("number")).and_then(|v| v.as_u64()) else {
            return;
        };
        let key = format!("{repo}#{number}");
        self.active_reviews.lock().unwrap_or_else(|e| e.into_inner()).remove(&key);
    }

    async fn run_review(&self, key: String, repo: String, number: u64, targets: Vec<String>) {
        let outcome = self.execute_review(&repo, number).await;

        match outcome {
            Ok(result) => {
                self.notify_review_complete(&repo, number, &result, &targets).await;
            }
            Err(reason) => {
                self.emit_refusal(&repo, number, &reason).await;
            }
        }

        self.active_reviews.lock().unwrap_or_else(|e| e.into_inner()).remove(&key);
    }

    async fn execute_review(&self, repo: &str, number: u64) -> Result<ReviewResult, String> {
        let files = self
            .code_host
            .get_pull_request_files(repo, number)
            .await
            .map_err(|e| e.to_string())?;
        let pr = self.code_host.get_pull_request(repo, number).await.map_err(|e| e.to_string())?;

        let prompt = build_review_prompt(&pr, &files);
        let completion = self.invoke_with_retry(&prompt).await.map_err(|e| e.to_string())?;
        let mut result = parse_review_result(&completion).unwrap_or_else(|| heuristic_fallback(&completion));
        result.repair_invariants();

        self.hide_prior_reviews(repo, number).await;
        self.submit_review(repo, number, &result).await.map_err(|e| e.to_string())?;

        Ok(result)
    }

    /// 3-attempt exponential backoff, each attempt bounded by a 180 s
    /// timeout (spec.md §4.11 step 4).
    async fn invoke_with_retry(&self, prompt: &str) -> Result<String, RemoteError> {
        let message = Message::new(MessageRole::User, prompt);
        let mut last_err = RemoteError::Timeout("review".to_string());
        for attempt in 0..MAX_REVIEW_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
            let call = self.llm.complete(std::slice::from_ref(&message), 2000, 0.2);
            match tokio::time::timeout(REVIEW_TIMEOUT, call).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => last_err = e,
                Err(_) => last_err = RemoteError::Timeout("review".to_string()),
            }
        }
        Err(last_err)
    }

    /// Finds prior bot reviews in `CHANGES_REQUESTED` or `COMMENTED` state
    /// and hides them as outdated before submitting the fresh one (spec.md
    /// §4.11 step 7).
    async fn hide_prior_reviews(&self, repo: &str, number: u64) {
        let Ok(reviews) = self.code_host.get_pull_request_reviews(repo, number).await else {
            return;
        };
        for review in reviews {
            if matches!(review.state.as_str(), "CHANGES_REQUESTED" | "COMMENTED") {
                if let Err(e) = self.code_host.hide_review_as_outdated(repo, review.id).await {
                    tracing::warn!(repo, number, review_id = review.id, error = %e, "failed to hide prior review");
                }
            }
        }
    }

    /// `event = APPROVE iff approved && score >= 90, else COMMENT` — a
    /// `ChangesRequested` status is still submitted as COMMENT per
    /// spec.md §4.11 step 8's literal event mapping.
    async fn submit_review(&self, repo: &str, number: u64, result: &ReviewResult) -> Result<(), RemoteError> {
        let event = if result.approved && result.overall_score >= 90.0 {
            ReviewEvent::Approve
        } else {
            ReviewEvent::Comment
        };
        let comments: Vec<ReviewLineComment> = result
            .comments
            .iter()
            .take(MAX_SUBMITTED_COMMENTS)
            .map(|c| ReviewLineComment { path: c.file_path.clone(), line: c.line, body: c.message.clone() })
            .collect();
        self.code_host
            .create_review(repo, number, &result.summary, event, &comments)
            .await?;
        Ok(())
    }

    async fn notify_review_complete(&self, repo: &str, number: u64, result: &ReviewResult, targets: &[String]) {
        let record = NotificationRecord {
            title: format!("🤖 AI_REVIEW {repo}#{number} {:?}", result.status),
            body: format!("score {:.0}/100 — {}", result.overall_score, result.summary),
            url: None,
            image_url: None,
            mentions: Vec::new(),
            priority: 5,
            metadata: serde_json::json!({"repo": repo, "number": number, "score": result.overall_score}),
            created_at: chrono::Utc::now(),
        };
        for target_id in targets {
            let target = NotificationTarget { platform: "qq".to_string(), target_id: target_id.clone() };
            self.aggregation.add(target.aggregation_key(), target, record.clone());
        }
    }

    /// Failure path (spec.md §4.11 step 10 / §9's "PR review failure"): a
    /// templated comment explaining the failure, and removal of the review
    /// request so the bot isn't left stuck as a pending reviewer.
    async fn emit_refusal(&self, repo: &str, number: u64, reason: &str) {
        let body = format!("⚠️ Automated review could not complete: {reason}");
        if let Err(e) = self.code_host.create_comment(repo, number, &body).await {
            tracing::warn!(repo, number, error = %e, "failed to post review-failure comment");
        }
        let reviewers = self.code_host.get_review_requests(repo, number).await.unwrap_or_default();
        for reviewer in reviewers {
            let _ = self.code_host.remove_review_request(repo, number, &reviewer).await;
        }
    }
}

fn truncate_patch(patch: &Option<String>) -> String {
    match patch {
        Some(p) => p.chars().take(MAX_PATCH_CHARS).collect(),
        None => String::new(),
    }
}

fn build_review_prompt(pr: &serde_json::Value, files: &[PrFile]) -> String {
    let title = pr.get("title").and_then(|v| v.as_str()).unwrap_or("");
    let body = pr.get("body").and_then(|v| v.as_str()).unwrap_or("");
    let mut out = format!(
        "Review this pull request and respond with a JSON object matching \
         {{overall_score, approved, status, summary, detailed_analysis, comments, issues_count}}.\n\
         Title: {title}\nBody: {body}\nFiles:\n"
    );
    for file in files.iter().take(MAX_REVIEW_FILES) {
        out.push_str(&format!(
            "- {} ({}, +{}/-{})\n{}\n",
            file.filename,
            file.status,
            file.additions,
            file.deletions,
            truncate_patch(&file.patch)
        ));
    }
    out
}

#[derive(Debug, Deserialize)]
struct RawReviewResult {
    overall_score: f64,
    approved: bool,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    detailed_analysis: String,
    #[serde(default)]
    comments: Vec<RawReviewComment>,
}

#[derive(Debug, Deserialize)]
struct RawReviewComment {
    file_path: String,
    line: u32,
    #[serde(default)]
    severity: String,
    message: String,
    #[serde(default)]
    suggestion: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

fn severity_from_str(raw: &str) -> ReviewSeverity {
    match raw.to_lowercase().as_str() {
        "warning" => ReviewSeverity::Warning,
        "error" => ReviewSeverity::Error,
        "critical" => ReviewSeverity::Critical,
        _ => ReviewSeverity::Info,
    }
}

/// Parses the model's JSON, either fenced in ```json … ``` or raw (spec.md
/// §4.11 step 5).
fn parse_review_result(text: &str) -> Option<ReviewResult> {
    let json_str = if let Some(start) = text.find("```json") {
        let after = &text[start + 7..];
        let end = after.find("```")?;
        &after[..end]
    } else {
        text
    };
    let raw: RawReviewResult = serde_json::from_str(json_str.trim()).ok()?;

    let comments: Vec<ReviewComment> = raw
        .comments
        .into_iter()
        .map(|c| ReviewComment {
            file_path: c.file_path,
            line: c.line,
            severity: severity_from_str(&c.severity),
            message: c.message,
            suggestion: c.suggestion,
            category: c.category,
        })
        .collect();

    let mut issues_count = std::collections::HashMap::new();
    for comment in &comments {
        *issues_count.entry(comment.severity).or_insert(0) += 1;
    }

    let status = if raw.approved && raw.overall_score >= 90.0 {
        ReviewStatus::Approved
    } else if raw.overall_score < 70.0 {
        ReviewStatus::ChangesRequested
    } else {
        ReviewStatus::Commented
    };

    Some(ReviewResult {
        overall_score: raw.overall_score,
        approved: raw.approved,
        status,
        summary: raw.summary,
        detailed_analysis: raw.detailed_analysis,
        comments,
        issues_count,
    })
}

const POSITIVE_KEYWORDS: &[&str] = &["lgtm", "looks good", "approve", "ship it", "well done"];
const NEGATIVE_KEYWORDS: &[&str] = &["critical", "security", "vulnerability", "broken", "must fix"];
const MIXED_KEYWORDS: &[&str] = &["minor", "nit", "consider", "suggest"];

/// Sentiment-keyword fallback scorer when the model's output is not
/// parseable JSON (spec.md §4.11 step 5).
fn heuristic_fallback(text: &str) -> ReviewResult {
    let lower = text.to_lowercase();
    let (score, approved, status) = if POSITIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        (90.0, true, ReviewStatus::Approved)
    } else if NEGATIVE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        (65.0, false, ReviewStatus::ChangesRequested)
    } else if MIXED_KEYWORDS.iter().any(|k| lower.contains(k)) {
        (80.0, true, ReviewStatus::Commented)
    } else {
        (75.0, false, ReviewStatus::Commented)
    };

    ReviewResult {
        overall_score: score,
        approved,
        status,
        summary: "Automated heuristic review (model output was unparseable).".to_string(),
        detailed_analysis: text.chars().take(2000).collect(),
        comments: Vec::new(),
        issues_count: std::collections::HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_result() {
        let text = "```json\n{\"overall_score\": 92, \"approved\": true, \"summary\": \"good\", \"detailed_analysis\": \"fine\", \"comments\": []}\n```";
        let result = parse_review_result(text).unwrap();
        assert_eq!(result.overall_score, 92.0);
        assert!(result.approved);
    }

    #[test]
    fn heuristic_fallback_detects_negative_sentiment() {
        let result = heuristic_fallback("This change introduces a critical security vulnerability.");
        assert_eq!(result.overall_score, 65.0);
        assert!(!result.approved);
    }

    #[test]
    fn heuristic_fallback_detects_positive_sentiment() {
        let result = heuristic_fallback("LGTM, nice work!");
        assert_eq!(result.overall_score, 90.0);
        assert!(result.approved);
    }

    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    use crate::codehost::client::IssueComment;
    use crate::notifications::sender::NotificationSender;

    struct SlowClient {
        gate: Arc<Notify>,
        concurrent_calls: Arc<AtomicUsize>,
        max_concurrent_seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CodeHostClient for SlowClient {
        async fn get_issue(&self, _repo: &str, _number: u64) -> Result<Value, RemoteError> {
            Ok(Value::Null)
        }
        async fn create_issue(&self, _repo: &str, _title: &str, _body: &str) -> Result<Value, RemoteError> {
            Ok(Value::Null)
        }
        async fn update_issue(&self, _repo: &str, _number: u64, _patch: Value) -> Result<Value, RemoteError> {
            Ok(Value::Null)
        }
        async fn close_issue(&self, _repo: &str, _number: u64) -> Result<Value, RemoteError> {
            Ok(Value::Null)
        }
        async fn get_pull_request(&self, _repo: &str, _number: u64) -> Result<Value, RemoteError> {
            Ok(serde_json::json!({"title": "t", "body": "b"}))
        }
        async fn create_pull_request(&self, _repo: &str, _title: &str, _head: &str, _base: &str) -> Result<Value, RemoteError> {
            Ok(Value::Null)
        }
        async fn update_pull_request(&self, _repo: &str, _number: u64, _patch: Value) -> Result<Value, RemoteError> {
            Ok(Value::Null)
        }
        async fn merge_pull_request(&self, _repo: &str, _number: u64) -> Result<Value, RemoteError> {
            Ok(Value::Null)
        }
        async fn get_pull_request_files(&self, _repo: &str, _number: u64) -> Result<Vec<PrFile>, RemoteError> {
            let before = self.concurrent_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent_seen.fetch_max(before, Ordering::SeqCst);
            self.gate.notified().await;
            self.concurrent_calls.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        async fn list_comments(&self, _repo: &str, _number: u64) -> Result<Vec<IssueComment>, RemoteError> {
            Ok(Vec::new())
        }
        async fn create_comment(&self, _repo: &str, _number: u64, body: &str) -> Result<IssueComment, RemoteError> {
            Ok(IssueComment { id: 1, body: body.to_string(), author_login: "bot".to_string(), html_url: String::new() })
        }
        async fn update_comment(&self, _repo: &str, _comment_id: u64, body: &str) -> Result<IssueComment, RemoteError> {
            Ok(IssueComment { id: 1, body: body.to_string(), author_login: "bot".to_string(), html_url: String::new() })
        }
        async fn delete_comment(&self, _repo: &str, _comment_id: u64) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn add_labels(&self, _repo: &str, _number: u64, _labels: &[String]) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn remove_label(&self, _repo: &str, _number: u64, _label: &str) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn create_label(&self, _repo: &str, _name: &str, _color: &str) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn assign_issue(&self, _repo: &str, _number: u64, _assignee: &str) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn unassign_issue(&self, _repo: &str, _number: u64, _assignee: &str) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn list_issues(&self, _repo: &str, _state: &str) -> Result<Vec<Value>, RemoteError> {
            Ok(Vec::new())
        }
        async fn search_code(&self, _repo: &str, _query: &str) -> Result<Value, RemoteError> {
            Ok(serde_json::json!({"items": []}))
        }
        async fn create_review(
            &self,
            _repo: &str,
            _pr_number: u64,
            _body: &str,
            _event: ReviewEvent,
            _comments: &[ReviewLineComment],
        ) -> Result<crate::codehost::client::PrReview, RemoteError> {
            Ok(crate::codehost::client::PrReview { id: 1, state: "COMMENTED".to_string(), author_login: "bot".to_string() })
        }
        async fn get_pull_request_reviews(&self, _repo: &str, _pr_number: u64) -> Result<Vec<crate::codehost::client::PrReview>, RemoteError> {
            Ok(Vec::new())
        }
        async fn hide_review_as_outdated(&self, _repo: &str, _review_id: u64) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn get_review_requests(&self, _repo: &str, _pr_number: u64) -> Result<Vec<String>, RemoteError> {
            Ok(Vec::new())
        }
        async fn remove_review_request(&self, _repo: &str, _pr_number: u64, _reviewer: &str) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn request_reviewers(&self, _repo: &str, _pr_number: u64, _reviewers: &[String]) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    struct StubLlm;

    #[async_trait]
    impl LlmProvider for StubLlm {
        async fn complete(&self, _messages: &[Message], _max_tokens: u32, _temperature: f32) -> Result<String, RemoteError> {
            Ok(r#"{"overall_score": 92, "approved": true, "summary": "ok", "detailed_analysis": "", "comments": []}"#.to_string())
        }
    }

    struct NoopAdapter;

    #[async_trait]
    impl ChatAdapter for NoopAdapter {
        async fn send(&self, _target: &NotificationTarget, _text: &str) -> Result<String, String> {
            Ok("m".to_string())
        }
        async fn recall(&self, _target: &NotificationTarget, _message_id: &str) -> Result<(), String> {
            Ok(())
        }
    }

    fn review_requested_payload(number: u64, bot: &str) -> serde_json::Value {
        serde_json::json!({
            "action": "review_requested",
            "pull_request": {"number": number, "requested_reviewers": [{"login": bot}]},
        })
    }

    #[tokio::test]
    async fn second_trigger_for_same_pr_is_dropped_while_first_is_active() {
        let gate = Arc::new(Notify::new());
        let concurrent_calls = Arc::new(AtomicUsize::new(0));
        let max_concurrent_seen = Arc::new(AtomicUsize::new(0));
        let client: Arc<dyn CodeHostClient> = Arc::new(SlowClient {
            gate: Arc::clone(&gate),
            concurrent_calls: Arc::clone(&concurrent_calls),
            max_concurrent_seen: Arc::clone(&max_concurrent_seen),
        });
        let llm: Arc<dyn LlmProvider> = Arc::new(StubLlm);
        let sender = Arc::new(NotificationSender::new(NoopAdapter));
        let aggregation = AggregationEngine::new(sender, Duration::from_millis(20));
        let controller = ReviewController::new(client, llm, aggregation);

        let mut repo_config = RepositoryConfig { review_bot_username: Some("relay-bot".to_string()), ..Default::default() };
        repo_config.enabled = true;
        let payload = review_requested_payload(42, "relay-bot");

        controller.handle_review_requested(&payload, "o/r", &repo_config);
        tokio::task::yield_now().await;
        assert_eq!(controller.active_review_count(), 1);

        // Second trigger for the same (repo, pr) while the first is still in flight: dropped.
        controller.handle_review_requested(&payload, "o/r", &repo_config);
        tokio::task::yield_now().await;
        assert_eq!(controller.active_review_count(), 1);

        gate.notify_waiters();
        for _ in 0..50 {
            if controller.active_review_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(controller.active_review_count(), 0);
        assert_eq!(max_concurrent_seen.load(Ordering::SeqCst), 1);
    }

    fn review_request_removed_payload(number: u64, bot: &str) -> serde_json::Value {
        serde_json::json!({
            "action": "review_request_removed",
            "requested_reviewer": {"login": bot},
            "pull_request": {"number": number},
        })
    }

    #[tokio::test]
    async fn review_request_removed_clears_active_key_without_waiting_for_the_task() {
        let gate = Arc::new(Notify::new());
        let concurrent_calls = Arc::new(AtomicUsize::new(0));
        let max_concurrent_seen = Arc::new(AtomicUsize::new(0));
        let client: Arc<dyn CodeHostClient> = Arc::new(SlowClient {
            gate: Arc::clone(&gate),
            concurrent_calls,
            max_concurrent_seen,
        });
        let llm: Arc<dyn LlmProvider> = Arc::new(StubLlm);
        let sender = Arc::new(NotificationSender::new(NoopAdapter));
        let aggregation = AggregationEngine::new(sender, Duration::from_millis(20));
        let controller = ReviewController::new(client, llm, aggregation);

        let repo_config = RepositoryConfig { review_bot_username: Some("relay-bot".to_string()), enabled: true, ..Default::default() };
        let requested = review_requested_payload(42, "relay-bot");
        controller.handle_review_requested(&requested, "o/r", &repo_config);
        tokio::task::yield_now().await;
        assert_eq!(controller.active_review_count(), 1);

        let removed = review_request_removed_payload(42, "relay-bot");
        controller.handle_review_request_removed(&removed, "o/r", &repo_config);
        assert_eq!(controller.active_review_count(), 0);

        gate.notify_waiters();
    }
}
