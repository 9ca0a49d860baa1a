//! Code-Host Automation: one of the handlers in the webhook dispatcher's
//! parallel set for `{issues, pull_request}` events (spec.md §4.3's "format
//! validation comment, auto-labeling by keyword"). No single corpus file
//! spells out the exact keyword rules, so the label set and buckets here
//! are a narrow, pragmatic design rather than a literal port — see
//! DESIGN.md.

use std::sync::Arc;

use crate::codehost::client::CodeHostClient;
use crate::models::WebhookEvent;

const MIN_BODY_CHARS: usize = 20;
const FORMAT_WARNING: &str = "⚠️ This report is quite short — adding reproduction steps or more detail will help it get triaged faster.";

struct LabelRule {
    label: &'static str,
    keywords: &'static [&'static str],
}

const LABEL_RULES: &[LabelRule] = &[
    LabelRule {
        label: "bug",
        keywords: &["bug", "crash", "broken", "doesn't work", "not working", "error", "fails", "failure"],
    },
    LabelRule {
        label: "enhancement",
        keywords: &["feature request", "enhancement", "would be nice", "please add", "feature:"],
    },
    LabelRule {
        label: "documentation",
        keywords: &["docs", "documentation", "readme", "typo"],
    },
    LabelRule {
        label: "question",
        keywords: &["question", "how do i", "how to", "is there a way"],
    },
];

pub struct CodeHostAutomation {
    code_host: Arc<dyn CodeHostClient>,
}

impl CodeHostAutomation {
    pub fn new(code_host: Arc<dyn CodeHostClient>) -> Self {
        Self { code_host }
    }

    /// Only acts on the `opened` action; every other action (`edited`,
    /// `closed`, `labeled`, ...) is a silent no-op for this handler.
    pub async fn handle(&self, event: &WebhookEvent, repo: &str) -> Result<(), String> {
        if event.payload.get("action").and_then(|v| v.as_str()) != Some("opened") {
            return Ok(());
        }
        let node = match event.event_type.as_str() {
            "issues" => event.payload.get("issue"),
            "pull_request" => event.payload.get("pull_request"),
            _ => None,
        };
        let Some(node) = node else { return Ok(()) };
        let Some(number) = node.get("number").and_then(|v| v.as_u64()) else {
            return Ok(());
        };
        let title = node.get("title").and_then(|v| v.as_str()).unwrap_or("");
        let body = node.get("body").and_then(|v| v.as_str()).unwrap_or("");

        if body.trim().chars().count() < MIN_BODY_CHARS {
            self.code_host
                .create_comment(repo, number, FORMAT_WARNING)
                .await
                .map_err(|e| e.to_string())?;
        }

        let labels = matching_labels(title, body);
        if !labels.is_empty() {
            self.code_host
                .add_labels(repo, number, &labels)
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

fn matching_labels(title: &str, body: &str) -> Vec<String> {
    let haystack = format!("{title} {body}").to_lowercase();
    LABEL_RULES
        .iter()
        .filter(|rule| rule.keywords.iter().any(|kw| haystack.contains(kw)))
        .map(|rule| rule.label.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codehost::client::{IssueComment, PrFile, PrReview, ReviewEvent, ReviewLineComment};
    use crate::errors::RemoteError;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeClient {
        comments: Mutex<Vec<String>>,
        labels: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl CodeHostClient for FakeClient {
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
            self.comments.lock().unwrap().push(body.to_string());
            Ok(IssueComment { id: 1, body: body.to_string(), author_login: "bot".to_string(), html_url: String::new() })
        }
        async fn update_comment(&self, _repo: &str, _comment_id: u64, body: &str) -> Result<IssueComment, RemoteError> {
            Ok(IssueComment { id: 1, body: body.to_string(), author_login: "bot".to_string(), html_url: String::new() })
        }
        async fn delete_comment(&self, _repo: &str, _comment_id: u64) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn add_labels(&self, _repo: &str, _number: u64, labels: &[String]) -> Result<(), RemoteError> {
            self.labels.lock().unwrap().push(labels.to_vec());
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

    fn issue_event(title: &str, body: &str) -> WebhookEvent {
        WebhookEvent {
            event_type: "issues".to_string(),
            delivery_id: "d1".to_string(),
            signature: None,
            raw_body: Vec::new(),
            payload: serde_json::json!({"action": "opened", "issue": {"number": 1, "title": title, "body": body}}),
            repository: Some("o/r".to_string()),
            timestamp: chrono::Utc::now(),
            error: None,
        }
    }

    #[tokio::test]
    async fn short_body_gets_a_format_comment() {
        let client = Arc::new(FakeClient::default());
        let automation = CodeHostAutomation::new(client.clone());
        automation.handle(&issue_event("bug", "short"), "o/r").await.unwrap();
        assert_eq!(client.comments.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn adequate_body_skips_format_comment() {
        let client = Arc::new(FakeClient::default());
        let automation = CodeHostAutomation::new(client.clone());
        let body = "This is a sufficiently detailed report with enough characters in it.";
        automation.handle(&issue_event("a problem", body), "o/r").await.unwrap();
        assert!(client.comments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn keyword_match_adds_label() {
        let client = Arc::new(FakeClient::default());
        let automation = CodeHostAutomation::new(client.clone());
        let body = "This app crashes on startup every single time I open it, with a long repro.";
        automation.handle(&issue_event("app crashes on startup", body), "o/r").await.unwrap();
        let labels = client.labels.lock().unwrap();
        assert_eq!(labels.len(), 1);
        assert!(labels[0].contains(&"bug".to_string()));
    }

    #[tokio::test]
    async fn non_opened_action_is_a_no_op() {
        let client = Arc::new(FakeClient::default());
        let automation = CodeHostAutomation::new(client.clone());
        let mut event = issue_event("bug", "short");
        event.payload["action"] = serde_json::json!("edited");
        automation.handle(&event, "o/r").await.unwrap();
        assert!(client.comments.lock().unwrap().is_empty());
        assert!(client.labels.lock().unwrap().is_empty());
    }
}
