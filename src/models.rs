//! Shared data model types (spec §3).
//!
//! Ownership: the Context Store exclusively owns `ConversationContext` and
//! `Message` values; a `ToolCall` is owned by its context; a
//! `NotificationRecord` transfers ownership Formatter → Aggregator → Sender
//! (single owner at a time, enforced by move semantics in the pipeline).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A decoded, in-flight webhook delivery. Transient: created per request,
/// discarded after the worker finishes with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub delivery_id: String,
    pub signature: Option<String>,
    #[serde(skip)]
    pub raw_body: Vec<u8>,
    pub payload: serde_json::Value,
    pub repository: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl WebhookEvent {
    /// `owner/name` derived from `payload.repository.full_name`, falling back
    /// to constructing it from `owner.login` + `name`.
    pub fn derive_repository(payload: &serde_json::Value) -> Option<String> {
        if let Some(full_name) = payload
            .get("repository")
            .and_then(|r| r.get("full_name"))
            .and_then(|v| v.as_str())
        {
            return Some(full_name.to_string());
        }
        let repo = payload.get("repository")?;
        let owner = repo.get("owner")?.get("login")?.as_str()?;
        let name = repo.get("name")?.as_str()?;
        Some(format!("{owner}/{name}"))
    }
}

/// Per-repository configuration (spec §3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub enabled: bool,
    pub webhook_secret: Option<String>,
    pub verify_signature: bool,
    /// Bearer token for outbound code-host API calls scoped to this repo,
    /// distinct from `webhook_secret` (the inbound HMAC key). Falls back to
    /// the global token when absent (spec.md §6).
    pub code_host_token: Option<String>,
    pub qq_target_ids: Vec<String>,
    /// Empty = all event types allowed.
    pub allowed_event_types: std::collections::HashSet<String>,
    pub review_bot_username: Option<String>,
    pub review_enabled: bool,
    pub notification_channels: std::collections::HashSet<String>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_secret: None,
            verify_signature: true,
            code_host_token: None,
            qq_target_ids: Vec::new(),
            allowed_event_types: std::collections::HashSet::new(),
            review_bot_username: None,
            review_enabled: false,
            notification_channels: std::collections::HashSet::from(["qq".to_string()]),
        }
    }
}

/// A rendered, ready-to-send notification (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub title: String,
    pub body: String,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub mentions: Vec<String>,
    pub priority: u8,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A send target: one chat-platform group/channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationTarget {
    pub platform: String,
    pub target_id: String,
}

impl NotificationTarget {
    /// `"<platform>_<target_id>"` — the aggregation key (spec §4.4).
    pub fn aggregation_key(&self) -> String {
        format!("{}_{}", self.platform, self.target_id)
    }
}

/// Ordered chat/code-host permission levels (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatPermissionLevel {
    None,
    Read,
    Write,
    Su,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeHostPermissionLevel {
    None,
    Write,
}

/// A conversation's kind, used to derive its deterministic id (spec §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextKind {
    ChatGroup,
    ChatPrivate,
    CodeHostPr,
    CodeHostIssue,
    CodeHostPrReview,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub author: Option<String>,
    pub message_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            author: None,
            message_id: None,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub parameters: serde_json::Value,
    pub call_id: String,
    pub status: ToolCallStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            parameters,
            call_id: uuid::Uuid::new_v4().to_string(),
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            execution_time_ms: None,
            retry_count: 0,
            max_retries: 2,
        }
    }
}

/// Persisted conversation state (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub context_id: String,
    pub context_type: ContextKind,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub group_id: Option<String>,
    pub user_id: Option<String>,
    pub repository: Option<String>,
    pub issue_or_pr_id: Option<String>,
    pub max_messages: usize,
}

/// Review comment severity (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub file_path: String,
    pub line: u32,
    pub severity: ReviewSeverity,
    pub message: String,
    pub suggestion: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    ChangesRequested,
    Commented,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub overall_score: f64,
    pub approved: bool,
    pub status: ReviewStatus,
    pub summary: String,
    pub detailed_analysis: String,
    pub comments: Vec<ReviewComment>,
    pub issues_count: HashMap<ReviewSeverity, u32>,
}

impl ReviewResult {
    /// Ensures `issues_count` has all four severity keys and the score/status
    /// invariants from spec §4.11 step 6 hold.
    pub fn repair_invariants(&mut self) {
        self.overall_score = self.overall_score.clamp(0.0, 100.0);
        if self.approved && self.overall_score < 70.0 {
            self.approved = false;
            self.status = ReviewStatus::ChangesRequested;
        }
        for sev in [
            ReviewSeverity::Info,
            ReviewSeverity::Warning,
            ReviewSeverity::Error,
            ReviewSeverity::Critical,
        ] {
            self.issues_count.entry(sev).or_insert(0);
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitBucket {
    pub request_count: u32,
    pub window_start: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}
