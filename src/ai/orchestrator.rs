//! AI Orchestrator (C12, spec.md §4.5, §4.8). The multi-turn LLM loop:
//! parses inline tool invocations, enforces the whitelist + two-level
//! permission model, executes code-host actions, and re-feeds results to
//! the model until termination. Grounded in
//! `sweengineeringlabs-swebash`'s `ToolAwareChatEngine` loop shape.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::ai::context::ContextStore;
use crate::ai::tools::{ToolRegistry, WRITE_TOOLS};
use crate::codehost::client::CodeHostClient;
use crate::context_id::{derive_context_id, ContextIdParams};
use crate::llm::LlmProvider;
use crate::models::{ChatPermissionLevel, ContextKind, ConversationContext, Message, MessageRole};
use crate::notifications::sender::ChatAdapter;
use crate::permissions::PermissionStore;
use crate::rate_limit::{RateLimitBucketKind, RateLimitConfig, RateLimiter};

const MAX_TURNS: usize = 15;
const MAX_MESSAGE_LEN: usize = 4000;
const PER_TURN_TIMEOUT: Duration = Duration::from_secs(30);
const HISTORY_TAIL: usize = 10;
const END_TOKENS: &[&str] = &["[END]", "[DONE]", "[COMPLETE]", "[FINISHED]", "[对话结束]", "[完成]"];

pub struct ChatMessageContext {
    pub user_id: String,
    pub group_id: Option<String>,
    pub content: String,
    pub message_id: String,
}

pub struct AiOrchestrator {
    contexts: Arc<ContextStore>,
    permissions: Arc<PermissionStore>,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn LlmProvider>,
    code_host: Arc<dyn CodeHostClient>,
    chat_adapter: Option<Arc<dyn ChatAdapter>>,
    limiter: RateLimiter,
    rate_config: RateLimitConfig,
    max_tokens: u32,
    temperature: f32,
}

impl AiOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        contexts: Arc<ContextStore>,
        permissions: Arc<PermissionStore>,
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn LlmProvider>,
        code_host: Arc<dyn CodeHostClient>,
        chat_adapter: Option<Arc<dyn ChatAdapter>>,
        rate_config: RateLimitConfig,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            contexts,
            permissions,
            tools,
            llm,
            code_host,
            chat_adapter,
            limiter: RateLimiter::new(),
            rate_config,
            max_tokens,
            temperature,
        }
    }

    /// Entry point (spec.md §4.5). Never returns an `Err` to the chat
    /// layer: failures are caught and folded into the returned text per
    /// spec.md §4.5's failure semantics.
    pub async fn handle_chat_message(&self, input: ChatMessageContext) -> String {
        if !self
            .limiter
            .check_bucket(&self.rate_config, &input.user_id, RateLimitBucketKind::Generic)
            .allowed
        {
            return "⏳ 请求过于频繁，请稍后再试 / rate limit exceeded".to_string();
        }
        if input.content.chars().count() > MAX_MESSAGE_LEN {
            return "⚠️ 消息过长 / message too long".to_string();
        }
        if self
            .permissions
            .require_chat_level(&input.user_id, ChatPermissionLevel::Read)
            .is_err()
        {
            return "🚫 权限不足，需要 READ 权限 / permission denied: requires READ".to_string();
        }

        let context_kind = if input.group_id.is_some() { ContextKind::ChatGroup } else { ContextKind::ChatPrivate };
        let context_id = derive_context_id(
            context_kind,
            &ContextIdParams {
                group_id: input.group_id.clone(),
                user_id: Some(input.user_id.clone()),
                ..Default::default()
            },
        );
        let handle = self.contexts.fetch_or_create(
            &context_id,
            context_kind,
            input.group_id.clone(),
            Some(input.user_id.clone()),
            None,
            None,
        );

        let mut user_message = Message::new(MessageRole::User, input.content.clone());
        user_message.message_id = Some(input.message_id.clone());
        if let Err(e) = self.contexts.append_message(&handle, user_message) {
            return format!("❌ 内部错误 / internal error: {e}");
        }

        match self.run_turn_loop(&input, &handle).await {
            Ok((text, ..)) => text,
            Err(e) => format!("❌ {e}"),
        }
    }

    /// Entry point for code-host-originated messages (C15's Comment-Reply
    /// Reconciler): same turn loop as chat, but the context is keyed by
    /// repository/PR-or-issue instead of a chat group, and no write-op
    /// status messages are emitted (no `group_id`). Returns the reply text
    /// plus `(tools_ok, tools_failed)` so the caller can render a signature
    /// block (spec.md §4.12's "success/failure counts").
    pub async fn handle_code_host_message(
        &self,
        context_kind: ContextKind,
        owner_repo: &str,
        pr_or_issue: &str,
        author: &str,
        content: String,
        message_id: String,
    ) -> (String, u32, u32) {
        if self
            .permissions
            .require_chat_level(author, ChatPermissionLevel::Read)
            .is_err()
        {
            return ("🚫 permission denied: requires READ".to_string(), 0, 0);
        }

        let context_id = derive_context_id(
            context_kind,
            &ContextIdParams {
                owner_repo: Some(owner_repo.to_string()),
                pr_or_issue: Some(pr_or_issue.to_string()),
                ..Default::default()
            },
        );
        let handle = self.contexts.fetch_or_create(
            &context_id,
            context_kind,
            None,
            Some(author.to_string()),
            Some(owner_repo.to_string()),
            Some(pr_or_issue.to_string()),
        );

        let input = ChatMessageContext {
            user_id: author.to_string(),
            group_id: None,
            content: content.clone(),
            message_id: message_id.clone(),
        };
        let mut user_message = Message::new(MessageRole::User, content);
        user_message.message_id = Some(message_id);
        if let Err(e) = self.contexts.append_message(&handle, user_message) {
            return (format!("❌ internal error: {e}"), 0, 0);
        }

        match self.run_turn_loop(&input, &handle).await {
            Ok(result) => result,
            Err(e) => (format!("❌ {e}"), 0, 0),
        }
    }

    /// Returns `(reply_text, tools_ok, tools_failed)`.
    async fn run_turn_loop(
        &self,
        input: &ChatMessageContext,
        handle: &Arc<Mutex<ConversationContext>>,
    ) -> Result<(String, u32, u32), String> {
        let effective_level = self.permissions.effective_chat_level(&input.user_id);
        let system_prompt = self.build_system_prompt(effective_level);

        let mut wrote_any = false;
        let mut last_text = String::new();
        let mut tools_ok: u32 = 0;
        let mut tools_failed: u32 = 0;

        for _turn in 0..MAX_TURNS {
            if !self
                .limiter
                .check_bucket(&self.rate_config, &input.user_id, RateLimitBucketKind::AiCall)
                .allowed
            {
                return Err("⏳ AI 调用频率过高 / AI call rate limit exceeded".to_string());
            }

            let messages = self.build_message_list(handle, &system_prompt);

            let completion = tokio::time::timeout(
                PER_TURN_TIMEOUT,
                self.llm.complete(&messages, self.max_tokens, self.temperature),
            )
            .await
            .map_err(|_| "LLM call timed out".to_string())?
            .map_err(|e| e.to_string())?;

            let (cleaned, ended) = strip_end_token(&completion);
            last_text = cleaned.clone();

            let mut assistant_message = Message::new(MessageRole::Assistant, cleaned.clone());
            assistant_message.metadata.insert(
                "reply_to_message_id".to_string(),
                serde_json::Value::from(input.message_id.clone()),
            );
            if ended {
                self.contexts.append_message(handle, assistant_message).map_err(|e| e.to_string())?;
                return Ok((last_text, tools_ok, tools_failed));
            }

            let parsed_calls = crate::ai::parser::parse_tool_calls(&completion);
            if parsed_calls.is_empty() {
                self.contexts.append_message(handle, assistant_message).map_err(|e| e.to_string())?;
                return Ok((last_text, tools_ok, tools_failed));
            }
            assistant_message.metadata.insert(
                "tool_call_count".to_string(),
                serde_json::Value::from(parsed_calls.len()),
            );
            self.contexts.append_message(handle, assistant_message).map_err(|e| e.to_string())?;

            let mut tool_results = Vec::new();
            for parsed in parsed_calls {
                let is_write = WRITE_TOOLS.contains(&parsed.name.as_str());
                wrote_any = wrote_any || is_write;
                let (result, ok) = self.execute_tool_call(input, &parsed.name, parsed.parameters).await;
                if ok {
                    tools_ok += 1;
                } else {
                    tools_failed += 1;
                }
                tool_results.push(format!("{}: {}", parsed.name, result));
            }

            let results_message = Message::new(MessageRole::User, format!("Tool results:\n{}", tool_results.join("\n")));
            self.contexts.append_message(handle, results_message).map_err(|e| e.to_string())?;
        }

        if wrote_any {
            return Ok((String::new(), tools_ok, tools_failed));
        }
        Ok((last_text, tools_ok, tools_failed))
    }

    fn build_system_prompt(&self, level: ChatPermissionLevel) -> String {
        let tool_names: Vec<&str> = self.tools.all().map(|t| t.name).collect();
        format!(
            "You are a GitHub relay assistant. User permission level: {level:?}. Available tools: {}.",
            tool_names.join(", ")
        )
    }

    fn build_message_list(&self, handle: &Arc<Mutex<ConversationContext>>, system_prompt: &str) -> Vec<Message> {
        let context = handle.lock().unwrap_or_else(|e| e.into_inner());
        let mut messages = vec![Message::new(MessageRole::System, system_prompt)];
        let tail_start = context.messages.len().saturating_sub(HISTORY_TAIL);
        messages.extend(context.messages[tail_start..].iter().cloned());
        messages
    }

    /// Tool Executor (inside C12, spec.md §4.8): security validate →
    /// permission check → execute → write-op status UX around the call.
    /// Returns `(result_text, succeeded)`.
    async fn execute_tool_call(
        &self,
        input: &ChatMessageContext,
        tool_name: &str,
        raw_params: serde_json::Map<String, serde_json::Value>,
    ) -> (String, bool) {
        if !self
            .limiter
            .check_bucket(&self.rate_config, &input.user_id, RateLimitBucketKind::ToolCall)
            .allowed
        {
            return ("rate limit exceeded for tool-call class".to_string(), false);
        }

        let validated = match self.tools.validate(tool_name, &raw_params) {
            Ok(v) => v,
            Err(e) => return (e.to_string(), false),
        };

        let is_write = WRITE_TOOLS.contains(&tool_name);
        if is_write {
            if let Err(e) = self.permissions.check_write_permission(&input.user_id, tool_name) {
                return (e.to_string(), false);
            }
        }

        let status_message_id = if is_write {
            self.emit_write_status(input, tool_name, true, None).await
        } else {
            None
        };

        let outcome = self.dispatch_tool(tool_name, &validated).await;

        if is_write {
            if let Some(message_id) = status_message_id {
                self.recall_status(input, &message_id).await;
            }
            self.emit_write_status(input, tool_name, false, outcome.as_ref().err().cloned()).await;
        }

        match outcome {
            Ok(value) => (value.to_string(), true),
            Err(e) => (e, false),
        }
    }

    /// Dispatches a validated call to the code-host client. Only a subset
    /// of the registry's tools are wired to remote operations here; the
    /// rest (`get_context_stats`, `get_stats`, `get_user_info`) are served
    /// locally without a remote round-trip.
    async fn dispatch_tool(
        &self,
        tool_name: &str,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, String> {
        let owner = params.get("owner").and_then(|v| v.as_str()).unwrap_or("");
        let repo_name = params.get("repo").and_then(|v| v.as_str()).unwrap_or("");
        let repo = format!("{owner}/{repo_name}");
        let number = params.get("number").and_then(|v| v.as_u64()).unwrap_or(0);

        match tool_name {
            "get_issue" => self.code_host.get_issue(&repo, number).await.map_err(|e| e.to_string()),
            "create_issue" => {
                let title = params.get("title").and_then(|v| v.as_str()).unwrap_or("");
                let body = params.get("body").and_then(|v| v.as_str()).unwrap_or("");
                self.code_host.create_issue(&repo, title, body).await.map_err(|e| e.to_string())
            }
            "update_issue" => {
                let mut patch = serde_json::Map::new();
                if let Some(title) = params.get("title") {
                    patch.insert("title".to_string(), title.clone());
                }
                if let Some(body) = params.get("body") {
                    patch.insert("body".to_string(), body.clone());
                }
                self.code_host
                    .update_issue(&repo, number, serde_json::Value::Object(patch))
                    .await
                    .map_err(|e| e.to_string())
            }
            "close_issue" => self.code_host.close_issue(&repo, number).await.map_err(|e| e.to_string()),
            "reopen_issue" => self
                .code_host
                .update_issue(&repo, number, serde_json::json!({"state": "open"}))
                .await
                .map_err(|e| e.to_string()),
            "create_issue_comment" => {
                let body = params.get("body").and_then(|v| v.as_str()).unwrap_or("");
                self.code_host
                    .create_comment(&repo, number, body)
                    .await
                    .map(|c| serde_json::json!({"id": c.id}))
                    .map_err(|e| e.to_string())
            }
            "update_comment" => {
                let comment_id = params.get("comment_id").and_then(|v| v.as_u64()).unwrap_or(0);
                let body = params.get("body").and_then(|v| v.as_str()).unwrap_or("");
                self.code_host
                    .update_comment(&repo, comment_id, body)
                    .await
                    .map(|c| serde_json::json!({"id": c.id}))
                    .map_err(|e| e.to_string())
            }
            "delete_comment" => {
                let comment_id = params.get("comment_id").and_then(|v| v.as_u64()).unwrap_or(0);
                self.code_host
                    .delete_comment(&repo, comment_id)
                    .await
                    .map(|_| serde_json::json!({"ok": true}))
                    .map_err(|e| e.to_string())
            }
            "create_label" => {
                let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
                let color = params.get("color").and_then(|v| v.as_str()).unwrap_or("ededed");
                self.code_host
                    .create_label(&repo, name, color)
                    .await
                    .map(|_| serde_json::json!({"ok": true}))
                    .map_err(|e| e.to_string())
            }
            "add_label" => {
                let labels: Vec<String> = params
                    .get("labels")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                self.code_host
                    .add_labels(&repo, number, &labels)
                    .await
                    .map(|_| serde_json::json!({"ok": true}))
                    .map_err(|e| e.to_string())
            }
            "remove_label" => {
                let label = params.get("label").and_then(|v| v.as_str()).unwrap_or("");
                self.code_host
                    .remove_label(&repo, number, label)
                    .await
                    .map(|_| serde_json::json!({"ok": true}))
                    .map_err(|e| e.to_string())
            }
            "request_review" => {
                let reviewer = params.get("reviewer").and_then(|v| v.as_str()).unwrap_or("");
                self.code_host
                    .request_reviewers(&repo, number, &[reviewer.to_string()])
                    .await
                    .map(|_| serde_json::json!({"ok": true}))
                    .map_err(|e| e.to_string())
            }
            "list_issues" => {
                let state = params.get("state").and_then(|v| v.as_str()).unwrap_or("open");
                self.code_host
                    .list_issues(&repo, state)
                    .await
                    .map(|issues| serde_json::json!({"issues": issues}))
                    .map_err(|e| e.to_string())
            }
            "search_code" => {
                let query = params.get("query").and_then(|v| v.as_str()).unwrap_or("");
                self.code_host.search_code(&repo, query).await.map_err(|e| e.to_string())
            }
            "create_pull_request" => {
                let title = params.get("title").and_then(|v| v.as_str()).unwrap_or("");
                let head = params.get("head").and_then(|v| v.as_str()).unwrap_or("");
                let base = params.get("base").and_then(|v| v.as_str()).unwrap_or("");
                self.code_host.create_pull_request(&repo, title, head, base).await.map_err(|e| e.to_string())
            }
            "update_pull_request" => {
                let mut patch = serde_json::Map::new();
                if let Some(title) = params.get("title") {
                    patch.insert("title".to_string(), title.clone());
                }
                if let Some(body) = params.get("body") {
                    patch.insert("body".to_string(), body.clone());
                }
                self.code_host
                    .update_pull_request(&repo, number, serde_json::Value::Object(patch))
                    .await
                    .map_err(|e| e.to_string())
            }
            "merge_pull_request" => self.code_host.merge_pull_request(&repo, number).await.map_err(|e| e.to_string()),
            "assign_issue" => {
                let assignee = params.get("assignee").and_then(|v| v.as_str()).unwrap_or("");
                self.code_host
                    .assign_issue(&repo, number, assignee)
                    .await
                    .map(|_| serde_json::json!({"ok": true}))
                    .map_err(|e| e.to_string())
            }
            "unassign_issue" => {
                let assignee = params.get("assignee").and_then(|v| v.as_str()).unwrap_or("");
                self.code_host
                    .unassign_issue(&repo, number, assignee)
                    .await
                    .map(|_| serde_json::json!({"ok": true}))
                    .map_err(|e| e.to_string())
            }
            "find_related_contexts" => {
                let repository = params.get("repository").and_then(|v| v.as_str());
                let related = self.contexts.find_related(repository);
                Ok(serde_json::to_value(related).unwrap_or_default())
            }
            "get_context_stats" => Ok(serde_json::json!({"contexts": self.contexts.len()})),
            "get_stats" => Ok(serde_json::to_value(self.permissions.get_stats()).unwrap_or_default()),
            "get_user_info" => {
                let user_id = params.get("user_id").and_then(|v| v.as_str()).unwrap_or("");
                Ok(serde_json::to_value(self.permissions.get_user_info(user_id)).unwrap_or_default())
            }
            other => Err(format!("tool '{other}' is declared but not wired to an execution path")),
        }
    }

    /// Write-op UX protocol (spec.md §4.8): emits an "Executing…" message
    /// before the call and a success/failure message after, in a chat
    /// group context only.
    async fn emit_write_status(
        &self,
        input: &ChatMessageContext,
        tool_name: &str,
        is_before: bool,
        error: Option<String>,
    ) -> Option<String> {
        let group_id = input.group_id.as_ref()?;
        let adapter = self.chat_adapter.as_ref()?;
        let target = crate::models::NotificationTarget { platform: "qq".to_string(), target_id: group_id.clone() };
        let text = if is_before {
            format!("⏳ 正在执行 {tool_name} / Executing {tool_name}… (initiator: {})", input.user_id)
        } else {
            match error {
                None => format!("✅ {tool_name} 执行成功 / succeeded (initiator: {})", input.user_id),
                Some(e) => format!("❌ {tool_name} 执行失败 / failed: {e} (initiator: {})", input.user_id),
            }
        };
        adapter.send(&target, &text).await.ok()
    }

    async fn recall_status(&self, input: &ChatMessageContext, message_id: &str) {
        let Some(group_id) = &input.group_id else { return };
        let Some(adapter) = &self.chat_adapter else { return };
        let target = crate::models::NotificationTarget { platform: "qq".to_string(), target_id: group_id.clone() };
        let _ = adapter.recall(&target, message_id).await;
    }
}

fn strip_end_token(text: &str) -> (String, bool) {
    for token in END_TOKENS {
        if let Some(idx) = text.find(token) {
            let cleaned = format!("{}{}", &text[..idx], &text[idx + token.len()..]);
            return (cleaned.trim().to_string(), true);
        }
    }
    (text.trim().to_string(), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_end_token_detects_and_cleans() {
        let (cleaned, ended) = strip_end_token("here is the answer [DONE]");
        assert!(ended);
        assert_eq!(cleaned, "here is the answer");
    }

    #[test]
    fn strip_end_token_passes_through_without_token() {
        let (cleaned, ended) = strip_end_token("no end token here");
        assert!(!ended);
        assert_eq!(cleaned, "no end token here");
    }

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::ai::tools::ToolRegistry;
    use crate::codehost::client::{CodeHostClient, IssueComment, PrFile, PrReview, ReviewEvent, ReviewLineComment};
    use crate::errors::RemoteError;

    struct EndlessToolCallLlm;

    #[async_trait]
    impl LlmProvider for EndlessToolCallLlm {
        async fn complete(&self, _messages: &[Message], _max_tokens: u32, _temperature: f32) -> Result<String, RemoteError> {
            Ok("working on it [TOOL_CALL]get_issue(owner=o, repo=r, number=1)[/TOOL_CALL]".to_string())
        }
    }

    struct StubClient;

    #[async_trait]
    impl CodeHostClient for StubClient {
        async fn get_issue(&self, _repo: &str, _number: u64) -> Result<Value, RemoteError> {
            Ok(serde_json::json!({"number": 1}))
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
            Ok(Value::Null)
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
        ) -> Result<PrReview, RemoteError> {
            Ok(PrReview { id: 1, state: "COMMENTED".to_string(), author_login: "bot".to_string() })
        }
        async fn get_pull_request_reviews(&self, _repo: &str, _pr_number: u64) -> Result<Vec<PrReview>, RemoteError> {
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

    fn temp_dir(label: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("gh-relay-core-orchestrator-test-{label}-{}", uuid::Uuid::new_v4()))
    }

    /// Property 8 (spec.md §8): an assistant that never emits an end token
    /// and always requests a tool call must still have the turn loop
    /// terminate, bounded by `MAX_TURNS`.
    #[tokio::test]
    async fn turn_loop_terminates_within_max_turns_when_model_never_ends() {
        let contexts = Arc::new(ContextStore::new(temp_dir("contexts")).unwrap());
        let permissions = Arc::new(PermissionStore::load(temp_dir("permissions.json"), vec!["su1".to_string()]).unwrap());
        let tools = Arc::new(ToolRegistry::new());
        let llm: Arc<dyn LlmProvider> = Arc::new(EndlessToolCallLlm);
        let code_host: Arc<dyn CodeHostClient> = Arc::new(StubClient);
        let orchestrator = AiOrchestrator::new(
            contexts,
            permissions,
            tools,
            llm,
            code_host,
            None,
            RateLimitConfig::default(),
            1000,
            0.2,
        );

        let input = ChatMessageContext {
            user_id: "su1".to_string(),
            group_id: None,
            content: "please look into this".to_string(),
            message_id: "m1".to_string(),
        };

        let result = tokio::time::timeout(Duration::from_secs(10), orchestrator.handle_chat_message(input)).await;
        assert!(result.is_ok(), "turn loop did not terminate within the timeout");
    }
}
