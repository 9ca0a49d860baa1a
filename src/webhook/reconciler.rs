//! Comment-Reply Reconciler (C15, spec.md §4.12). Keeps the bot's replies
//! on `issue_comment`/`pull_request_review_comment` threads in sync with
//! the source comment's lifecycle, and prunes the matching
//! `ConversationContext` entries when a source message disappears (either
//! a code-host comment deletion or a chat message recall).

use std::sync::Arc;

use crate::ai::context::ContextStore;
use crate::ai::orchestrator::AiOrchestrator;
use crate::codehost::client::{CodeHostClient, IssueComment};
use crate::context_id::{derive_context_id, ContextIdParams};
use crate::models::{ContextKind, MessageRole, NotificationTarget, RepositoryConfig, WebhookEvent};
use crate::notifications::sender::ChatAdapter;

const BOT_SIGNATURE_MARKER: &str = "✨ Powered by";
const QUOTE_LINE_LIMIT: usize = 3;

pub struct CommentReplyReconciler {
    code_host: Arc<dyn CodeHostClient>,
    orchestrator: Arc<AiOrchestrator>,
    contexts: Arc<ContextStore>,
}

impl CommentReplyReconciler {
    pub fn new(code_host: Arc<dyn CodeHostClient>, orchestrator: Arc<AiOrchestrator>, contexts: Arc<ContextStore>) -> Self {
        Self { code_host, orchestrator, contexts }
    }

    pub async fn handle_comment_event(&self, event: &WebhookEvent, repo: &str, repo_config: &RepositoryConfig) -> Result<(), String> {
        let Some(bot) = repo_config.review_bot_username.as_deref() else { return Ok(()) };
        let Some(comment) = comment_node(event) else { return Ok(()) };
        let author = comment.get("user").and_then(|u| u.get("login")).and_then(|v| v.as_str()).unwrap_or("");
        if author.eq_ignore_ascii_case(bot) {
            return Ok(());
        }
        let Some(comment_id) = comment.get("id").and_then(|v| v.as_u64()) else { return Ok(()) };
        let body = comment.get("body").and_then(|v| v.as_str()).unwrap_or("");
        let Some(number) = target_number(event) else { return Ok(()) };
        let context_kind = context_kind_for(event);
        let action = event.payload.get("action").and_then(|v| v.as_str()).unwrap_or("");

        match action {
            "created" => self.handle_created(repo, number, context_kind, bot, comment_id, author, body).await,
            "edited" => self.handle_edited(repo, number, context_kind, bot, comment_id, author, body).await,
            "deleted" => self.handle_deleted(repo, number, context_kind, comment_id).await,
            _ => Ok(()),
        }
    }

    async fn handle_created(
        &self,
        repo: &str,
        number: u64,
        context_kind: ContextKind,
        bot: &str,
        comment_id: u64,
        author: &str,
        body: &str,
    ) -> Result<(), String> {
        if !mentions_bot(body, bot) {
            return Ok(());
        }
        let (reply_text, ok, failed) = self
            .orchestrator
            .handle_code_host_message(context_kind, repo, &number.to_string(), author, body.to_string(), comment_id.to_string())
            .await;
        let rendered = render_reply(body, &reply_text, bot, ok, failed, comment_id);
        self.code_host.create_comment(repo, number, &rendered).await.map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn handle_edited(
        &self,
        repo: &str,
        number: u64,
        context_kind: ContextKind,
        bot: &str,
        comment_id: u64,
        author: &str,
        body: &str,
    ) -> Result<(), String> {
        let prior = self.find_prior_replies(repo, number, comment_id).await?;
        if !mentions_bot(body, bot) {
            for reply in prior {
                let _ = self.code_host.delete_comment(repo, reply.id).await;
            }
            return Ok(());
        }
        let (reply_text, ok, failed) = self
            .orchestrator
            .handle_code_host_message(context_kind, repo, &number.to_string(), author, body.to_string(), comment_id.to_string())
            .await;
        let rendered = render_reply(body, &reply_text, bot, ok, failed, comment_id);
        match prior.into_iter().next() {
            Some(existing) => {
                self.code_host.update_comment(repo, existing.id, &rendered).await.map_err(|e| e.to_string())?;
            }
            None => {
                self.code_host.create_comment(repo, number, &rendered).await.map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }

    async fn handle_deleted(&self, repo: &str, number: u64, context_kind: ContextKind, comment_id: u64) -> Result<(), String> {
        let prior = self.find_prior_replies(repo, number, comment_id).await?;
        for reply in prior {
            let _ = self.code_host.delete_comment(repo, reply.id).await;
        }
        let context_id = derive_context_id(
            context_kind,
            &ContextIdParams { owner_repo: Some(repo.to_string()), pr_or_issue: Some(number.to_string()), ..Default::default() },
        );
        let handle = self.contexts.fetch_or_create(&context_id, context_kind, None, None, Some(repo.to_string()), Some(number.to_string()));
        self.contexts.remove_message(&handle, &comment_id.to_string());
        Ok(())
    }

    async fn find_prior_replies(&self, repo: &str, number: u64, source_comment_id: u64) -> Result<Vec<IssueComment>, String> {
        let marker = source_marker(source_comment_id);
        let comments = self.code_host.list_comments(repo, number).await.map_err(|e| e.to_string())?;
        Ok(comments.into_iter().filter(|c| c.body.contains(BOT_SIGNATURE_MARKER) && c.body.contains(&marker)).collect())
    }

    /// Locates the chat message by `message_id` in the context for
    /// `context_id`, removes it (and its paired assistant reply, if any),
    /// and best-effort-recalls the bot's own chat message(s).
    pub async fn handle_chat_recall(
        &self,
        context_kind: ContextKind,
        context_id: &str,
        message_id: &str,
        target: &NotificationTarget,
        adapter: &dyn ChatAdapter,
    ) {
        let handle = self.contexts.fetch_or_create(context_id, context_kind, None, None, None, None);
        let removed = self.contexts.remove_message(&handle, message_id);
        for message in removed {
            if message.role == MessageRole::Assistant {
                if let Some(mid) = &message.message_id {
                    let _ = adapter.recall(target, mid).await;
                }
            }
        }
    }
}

fn source_marker(comment_id: u64) -> String {
    format!("reconciler-source:{comment_id}")
}

fn mentions_bot(body: &str, bot: &str) -> bool {
    body.contains(&format!("@{bot}"))
}

fn comment_node(event: &WebhookEvent) -> Option<&serde_json::Value> {
    event.payload.get("comment")
}

fn target_number(event: &WebhookEvent) -> Option<u64> {
    match event.event_type.as_str() {
        "issue_comment" => event.payload.get("issue").and_then(|v| v.get("number")).and_then(|v| v.as_u64()),
        "pull_request_review_comment" => event.payload.get("pull_request").and_then(|v| v.get("number")).and_then(|v| v.as_u64()),
        _ => None,
    }
}

fn context_kind_for(event: &WebhookEvent) -> ContextKind {
    match event.event_type.as_str() {
        "issue_comment" => {
            if event.payload.get("issue").and_then(|v| v.get("pull_request")).is_some() {
                ContextKind::CodeHostPr
            } else {
                ContextKind::CodeHostIssue
            }
        }
        _ => ContextKind::CodeHostPr,
    }
}

/// Quoted excerpt (first `QUOTE_LINE_LIMIT` lines, ellipsis if truncated) +
/// reply text + a standardized signature block naming the bot and the
/// tool-call success/failure tally (spec.md §4.12).
fn render_reply(source_body: &str, reply_text: &str, bot: &str, tools_ok: u32, tools_failed: u32, source_comment_id: u64) -> String {
    let quoted = quote_excerpt(source_body);
    format!(
        "{quoted}\n\n{reply_text}\n\n---\n{BOT_SIGNATURE_MARKER} @{bot} · tools: {tools_ok} ok, {tools_failed} failed\n<!-- {} -->",
        source_marker(source_comment_id)
    )
}

fn quote_excerpt(body: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let truncated = lines.len() > QUOTE_LINE_LIMIT;
    let mut out: String = lines.iter().take(QUOTE_LINE_LIMIT).map(|l| format!("> {l}\n")).collect();
    if truncated {
        out.push_str("> ...\n");
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_excerpt_truncates_long_bodies() {
        let body = "line1\nline2\nline3\nline4\nline5";
        let quoted = quote_excerpt(body);
        assert_eq!(quoted, "> line1\n> line2\n> line3\n> ...");
    }

    #[test]
    fn quote_excerpt_passes_short_bodies_through() {
        let body = "line1\nline2";
        let quoted = quote_excerpt(body);
        assert_eq!(quoted, "> line1\n> line2");
    }

    #[test]
    fn mentions_bot_requires_at_sign() {
        assert!(mentions_bot("hey @relay-bot can you help?", "relay-bot"));
        assert!(!mentions_bot("relay-bot mentioned without at-sign", "relay-bot"));
    }

    #[test]
    fn render_reply_embeds_source_marker_and_signature() {
        let rendered = render_reply("short body", "here's the answer", "relay-bot", 2, 1, 42);
        assert!(rendered.contains("✨ Powered by @relay-bot"));
        assert!(rendered.contains("tools: 2 ok, 1 failed"));
        assert!(rendered.contains("reconciler-source:42"));
    }
}
