//! Code-Host API Client (C8, spec.md §4.9). Wraps the remote REST API
//! behind a narrow trait (the concrete transport is out of scope per
//! spec.md §1) with one production `reqwest`-based implementation and a
//! namespaced TTL read cache, grounded in the teacher's HMAC-signing
//! `reqwest::Client` usage in `webhooks.rs` for request construction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codehost::cache::TtlCache;
use crate::config::ConfigManager;
use crate::errors::RemoteError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrFile {
    pub filename: String,
    pub status: String,
    pub additions: u32,
    pub deletions: u32,
    pub patch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    pub body: String,
    pub author_login: String,
    pub html_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEvent {
    Approve,
    RequestChanges,
    Comment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewLineComment {
    pub path: String,
    pub line: u32,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrReview {
    pub id: u64,
    pub state: String,
    pub author_login: String,
}

/// The code-host collaborator interface (spec.md §4.9, §6). Every operation
/// the PR Review Controller and Tool Executor need to reach the remote
/// host goes through this trait.
#[async_trait]
pub trait CodeHostClient: Send + Sync {
    async fn get_issue(&self, repo: &str, number: u64) -> Result<Value, RemoteError>;
    async fn create_issue(&self, repo: &str, title: &str, body: &str) -> Result<Value, RemoteError>;
    async fn update_issue(&self, repo: &str, number: u64, patch: Value) -> Result<Value, RemoteError>;
    async fn close_issue(&self, repo: &str, number: u64) -> Result<Value, RemoteError>;

    async fn get_pull_request(&self, repo: &str, number: u64) -> Result<Value, RemoteError>;
    async fn create_pull_request(&self, repo: &str, title: &str, head: &str, base: &str) -> Result<Value, RemoteError>;
    async fn update_pull_request(&self, repo: &str, number: u64, patch: Value) -> Result<Value, RemoteError>;
    async fn merge_pull_request(&self, repo: &str, number: u64) -> Result<Value, RemoteError>;
    async fn get_pull_request_files(&self, repo: &str, number: u64) -> Result<Vec<PrFile>, RemoteError>;

    async fn list_comments(&self, repo: &str, number: u64) -> Result<Vec<IssueComment>, RemoteError>;
    async fn create_comment(&self, repo: &str, number: u64, body: &str) -> Result<IssueComment, RemoteError>;
    async fn update_comment(&self, repo: &str, comment_id: u64, body: &str) -> Result<IssueComment, RemoteError>;
    async fn delete_comment(&self, repo: &str, comment_id: u64) -> Result<(), RemoteError>;

    async fn add_labels(&self, repo: &str, number: u64, labels: &[String]) -> Result<(), RemoteError>;
    async fn remove_label(&self, repo: &str, number: u64, label: &str) -> Result<(), RemoteError>;
    async fn create_label(&self, repo: &str, name: &str, color: &str) -> Result<(), RemoteError>;

    async fn assign_issue(&self, repo: &str, number: u64, assignee: &str) -> Result<(), RemoteError>;
    async fn unassign_issue(&self, repo: &str, number: u64, assignee: &str) -> Result<(), RemoteError>;

    async fn list_issues(&self, repo: &str, state: &str) -> Result<Vec<Value>, RemoteError>;
    async fn search_code(&self, repo: &str, query: &str) -> Result<Value, RemoteError>;

    async fn create_review(
        &self,
        repo: &str,
        pr_number: u64,
        body: &str,
        event: ReviewEvent,
        comments: &[ReviewLineComment],
    ) -> Result<PrReview, RemoteError>;
    async fn get_pull_request_reviews(&self, repo: &str, pr_number: u64) -> Result<Vec<PrReview>, RemoteError>;
    async fn hide_review_as_outdated(&self, repo: &str, review_id: u64) -> Result<(), RemoteError>;

    async fn get_review_requests(&self, repo: &str, pr_number: u64) -> Result<Vec<String>, RemoteError>;
    async fn remove_review_request(&self, repo: &str, pr_number: u64, reviewer: &str) -> Result<(), RemoteError>;
    async fn request_reviewers(&self, repo: &str, pr_number: u64, reviewers: &[String]) -> Result<(), RemoteError>;
}

/// Production implementation over the GitHub REST API.
pub struct GithubClient {
    http: reqwest::Client,
    api_base_url: String,
    global_token: String,
    cache: TtlCache,
    config: Arc<ConfigManager>,
}

const CACHE_TTL: Duration = Duration::from_secs(300);

impl GithubClient {
    pub fn new(api_base_url: impl Into<String>, global_token: impl Into<String>, config: Arc<ConfigManager>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base_url: api_base_url.into(),
            global_token: global_token.into(),
            cache: TtlCache::new(CACHE_TTL),
            config,
        }
    }

    /// Bearer token for `repo`'s configured code-host token, falling back to
    /// the global token (spec.md §6). Distinct from the inbound HMAC secret
    /// used by the Signature Verifier — never reuse `webhook_secret` here.
    fn token_for(&self, repo: &str) -> String {
        let snapshot = self.config.snapshot();
        snapshot
            .get_repo_config(repo)
            .and_then(|c| c.code_host_token.as_deref())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.global_token.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    /// One retry with a 1 s delay on transient failure (spec.md §7's
    /// "C8: 1 retry").
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, RemoteError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RemoteError>>,
    {
        match op().await {
            Ok(v) => Ok(v),
            Err(RemoteError::Transient(host, reason)) => {
                tracing::warn!(%host, %reason, "transient code-host failure, retrying once");
                tokio::time::sleep(Duration::from_secs(1)).await;
                op().await
            }
            Err(e) => Err(e),
        }
    }

    async fn request_json(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &str,
        body: Option<Value>,
    ) -> Result<Value, RemoteError> {
        self.with_retry(|| async {
            let mut req = self
                .http
                .request(method.clone(), self.url(path))
                .bearer_auth(token)
                .header("Accept", "application/vnd.github+json");
            if let Some(ref b) = body {
                req = req.json(b);
            }
            let resp = req.send().await.map_err(|e| {
                RemoteError::Transient("github".to_string(), e.to_string())
            })?;
            let status = resp.status();
            if status.is_server_error() {
                return Err(RemoteError::Transient("github".to_string(), status.to_string()));
            }
            if !status.is_success() {
                return Err(RemoteError::Rejected("github".to_string(), status.to_string()));
            }
            resp.json::<Value>()
                .await
                .map_err(|e| RemoteError::Rejected("github".to_string(), e.to_string()))
        })
        .await
    }
}

#[async_trait]
impl CodeHostClient for GithubClient {
    async fn get_issue(&self, repo: &str, number: u64) -> Result<Value, RemoteError> {
        let cache_key = format!("{repo}:issue:{number}");
        if let Some(cached) = self.cache.get("github_api", &cache_key) {
            return Ok(cached);
        }
        let value = self
            .request_json(reqwest::Method::GET, &format!("/repos/{repo}/issues/{number}"), &self.token_for(repo), None)
            .await?;
        self.cache.put("github_api", &cache_key, value.clone());
        Ok(value)
    }

    async fn create_issue(&self, repo: &str, title: &str, body: &str) -> Result<Value, RemoteError> {
        let value = self
            .request_json(
                reqwest::Method::POST,
                &format!("/repos/{repo}/issues"),
                &self.token_for(repo),
                Some(serde_json::json!({"title": title, "body": body})),
            )
            .await?;
        self.cache.invalidate_prefix("github_api", &format!("{repo}:issue:"));
        Ok(value)
    }

    async fn update_issue(&self, repo: &str, number: u64, patch: Value) -> Result<Value, RemoteError> {
        let value = self
            .request_json(reqwest::Method::PATCH, &format!("/repos/{repo}/issues/{number}"), &self.token_for(repo), Some(patch))
            .await?;
        self.cache.invalidate_prefix("github_api", &format!("{repo}:issue:{number}"));
        Ok(value)
    }

    async fn close_issue(&self, repo: &str, number: u64) -> Result<Value, RemoteError> {
        self.update_issue(repo, number, serde_json::json!({"state": "closed"})).await
    }

    async fn get_pull_request(&self, repo: &str, number: u64) -> Result<Value, RemoteError> {
        let cache_key = format!("{repo}:pr:{number}");
        if let Some(cached) = self.cache.get("github_api", &cache_key) {
            return Ok(cached);
        }
        let value = self
            .request_json(reqwest::Method::GET, &format!("/repos/{repo}/pulls/{number}"), &self.token_for(repo), None)
            .await?;
        self.cache.put("github_api", &cache_key, value.clone());
        Ok(value)
    }

    async fn create_pull_request(&self, repo: &str, title: &str, head: &str, base: &str) -> Result<Value, RemoteError> {
        self.request_json(
            reqwest::Method::POST,
            &format!("/repos/{repo}/pulls"),
            &self.token_for(repo),
            Some(serde_json::json!({"title": title, "head": head, "base": base})),
        )
        .await
    }

    async fn update_pull_request(&self, repo: &str, number: u64, patch: Value) -> Result<Value, RemoteError> {
        let value = self
            .request_json(reqwest::Method::PATCH, &format!("/repos/{repo}/pulls/{number}"), &self.token_for(repo), Some(patch))
            .await?;
        self.cache.invalidate_prefix("github_api", &format!("{repo}:pr:{number}"));
        Ok(value)
    }

    async fn merge_pull_request(&self, repo: &str, number: u64) -> Result<Value, RemoteError> {
        let value = self
            .request_json(reqwest::Method::PUT, &format!("/repos/{repo}/pulls/{number}/merge"), &self.token_for(repo), None)
            .await?;
        self.cache.invalidate_prefix("github_api", &format!("{repo}:pr:{number}"));
        Ok(value)
    }

    async fn get_pull_request_files(&self, repo: &str, number: u64) -> Result<Vec<PrFile>, RemoteError> {
        let cache_key = format!("{repo}:pr:{number}:files");
        if let Some(cached) = self.cache.get("github_api", &cache_key) {
            return serde_json::from_value(cached).map_err(|e| RemoteError::Rejected("github".to_string(), e.to_string()));
        }
        let value = self
            .request_json(reqwest::Method::GET, &format!("/repos/{repo}/pulls/{number}/files"), &self.token_for(repo), None)
            .await?;
        self.cache.put("github_api", &cache_key, value.clone());
        serde_json::from_value(value).map_err(|e| RemoteError::Rejected("github".to_string(), e.to_string()))
    }

    async fn list_comments(&self, repo: &str, number: u64) -> Result<Vec<IssueComment>, RemoteError> {
        let cache_key = format!("{repo}:comments:{number}");
        if let Some(cached) = self.cache.get("github_api", &cache_key) {
            return serde_json::from_value(cached).map_err(|e| RemoteError::Rejected("github".to_string(), e.to_string()));
        }
        let value = self
            .request_json(reqwest::Method::GET, &format!("/repos/{repo}/issues/{number}/comments"), &self.token_for(repo), None)
            .await?;
        self.cache.put("github_api", &cache_key, value.clone());
        serde_json::from_value(value).map_err(|e| RemoteError::Rejected("github".to_string(), e.to_string()))
    }

    async fn create_comment(&self, repo: &str, number: u64, body: &str) -> Result<IssueComment, RemoteError> {
        let value = self
            .request_json(
                reqwest::Method::POST,
                &format!("/repos/{repo}/issues/{number}/comments"),
                &self.token_for(repo),
                Some(serde_json::json!({"body": body})),
            )
            .await?;
        self.cache.invalidate_prefix("github_api", &format!("{repo}:comments:{number}"));
        serde_json::from_value(value).map_err(|e| RemoteError::Rejected("github".to_string(), e.to_string()))
    }

    async fn update_comment(&self, repo: &str, comment_id: u64, body: &str) -> Result<IssueComment, RemoteError> {
        let value = self
            .request_json(
                reqwest::Method::PATCH,
                &format!("/repos/{repo}/issues/comments/{comment_id}"),
                &self.token_for(repo),
                Some(serde_json::json!({"body": body})),
            )
            .await?;
        self.cache.invalidate_prefix("github_api", &format!("{repo}:comments:"));
        serde_json::from_value(value).map_err(|e| RemoteError::Rejected("github".to_string(), e.to_string()))
    }

    async fn delete_comment(&self, repo: &str, comment_id: u64) -> Result<(), RemoteError> {
        self.request_json(
            reqwest::Method::DELETE,
            &format!("/repos/{repo}/issues/comments/{comment_id}"),
            &self.token_for(repo),
            None,
        )
        .await?;
        self.cache.invalidate_prefix("github_api", &format!("{repo}:comments:"));
        Ok(())
    }

    async fn add_labels(&self, repo: &str, number: u64, labels: &[String]) -> Result<(), RemoteError> {
        self.request_json(
            reqwest::Method::POST,
            &format!("/repos/{repo}/issues/{number}/labels"),
            &self.token_for(repo),
            Some(serde_json::json!({"labels": labels})),
        )
        .await?;
        Ok(())
    }

    async fn remove_label(&self, repo: &str, number: u64, label: &str) -> Result<(), RemoteError> {
        self.request_json(
            reqwest::Method::DELETE,
            &format!("/repos/{repo}/issues/{number}/labels/{label}"),
            &self.token_for(repo),
            None,
        )
        .await?;
        Ok(())
    }

    async fn create_label(&self, repo: &str, name: &str, color: &str) -> Result<(), RemoteError> {
        self.request_json(
            reqwest::Method::POST,
            &format!("/repos/{repo}/labels"),
            &self.token_for(repo),
            Some(serde_json::json!({"name": name, "color": color})),
        )
        .await?;
        Ok(())
    }

    async fn assign_issue(&self, repo: &str, number: u64, assignee: &str) -> Result<(), RemoteError> {
        self.request_json(
            reqwest::Method::POST,
            &format!("/repos/{repo}/issues/{number}/assignees"),
            &self.token_for(repo),
            Some(serde_json::json!({"assignees": [assignee]})),
        )
        .await?;
        self.cache.invalidate_prefix("github_api", &format!("{repo}:issue:{number}"));
        Ok(())
    }

    async fn unassign_issue(&self, repo: &str, number: u64, assignee: &str) -> Result<(), RemoteError> {
        self.request_json(
            reqwest::Method::DELETE,
            &format!("/repos/{repo}/issues/{number}/assignees"),
            &self.token_for(repo),
            Some(serde_json::json!({"assignees": [assignee]})),
        )
        .await?;
        self.cache.invalidate_prefix("github_api", &format!("{repo}:issue:{number}"));
        Ok(())
    }

    async fn list_issues(&self, repo: &str, state: &str) -> Result<Vec<Value>, RemoteError> {
        let cache_key = format!("{repo}:issues:{state}");
        if let Some(cached) = self.cache.get("github_api", &cache_key) {
            return serde_json::from_value(cached).map_err(|e| RemoteError::Rejected("github".to_string(), e.to_string()));
        }
        let value = self
            .request_json(reqwest::Method::GET, &format!("/repos/{repo}/issues?state={state}"), &self.token_for(repo), None)
            .await?;
        self.cache.put("github_api", &cache_key, value.clone());
        serde_json::from_value(value).map_err(|e| RemoteError::Rejected("github".to_string(), e.to_string()))
    }

    async fn search_code(&self, repo: &str, query: &str) -> Result<Value, RemoteError> {
        let cache_key = format!("{repo}:search:{query}");
        if let Some(cached) = self.cache.get("github_api", &cache_key) {
            return Ok(cached);
        }
        let scoped_query = format!("{query} repo:{repo}");
        let token = self.token_for(repo);
        let value = self
            .with_retry(|| async {
                let resp = self
                    .http
                    .get(self.url("/search/code"))
                    .bearer_auth(&token)
                    .header("Accept", "application/vnd.github+json")
                    .query(&[("q", scoped_query.as_str())])
                    .send()
                    .await
                    .map_err(|e| RemoteError::Transient("github".to_string(), e.to_string()))?;
                let status = resp.status();
                if status.is_server_error() {
                    return Err(RemoteError::Transient("github".to_string(), status.to_string()));
                }
                if !status.is_success() {
                    return Err(RemoteError::Rejected("github".to_string(), status.to_string()));
                }
                resp.json::<Value>().await.map_err(|e| RemoteError::Rejected("github".to_string(), e.to_string()))
            })
            .await?;
        self.cache.put("github_api", &cache_key, value.clone());
        Ok(value)
    }

    async fn create_review(
        &self,
        repo: &str,
        pr_number: u64,
        body: &str,
        event: ReviewEvent,
        comments: &[ReviewLineComment],
    ) -> Result<PrReview, RemoteError> {
        let value = self
            .request_json(
                reqwest::Method::POST,
                &format!("/repos/{repo}/pulls/{pr_number}/reviews"),
                &self.token_for(repo),
                Some(serde_json::json!({"body": body, "event": event, "comments": comments})),
            )
            .await?;
        self.cache.invalidate_prefix("github_api", &format!("{repo}:pr:{pr_number}"));
        serde_json::from_value(value).map_err(|e| RemoteError::Rejected("github".to_string(), e.to_string()))
    }

    async fn get_pull_request_reviews(&self, repo: &str, pr_number: u64) -> Result<Vec<PrReview>, RemoteError> {
        let value = self
            .request_json(reqwest::Method::GET, &format!("/repos/{repo}/pulls/{pr_number}/reviews"), &self.token_for(repo), None)
            .await?;
        serde_json::from_value(value).map_err(|e| RemoteError::Rejected("github".to_string(), e.to_string()))
    }

    async fn hide_review_as_outdated(&self, repo: &str, review_id: u64) -> Result<(), RemoteError> {
        // Open Question (a) in spec.md §9: the exact endpoint for marking a
        // review outdated varies by host API version. Modeled here as a
        // dismissal, the closest stable REST primitive; confirm against the
        // production host before relying on this in a live deployment.
        self.request_json(
            reqwest::Method::PUT,
            &format!("/repos/{repo}/pulls/reviews/{review_id}/dismissals"),
            &self.token_for(repo),
            Some(serde_json::json!({"message": "superseded by a newer review", "event": "DISMISS"})),
        )
        .await?;
        Ok(())
    }

    async fn get_review_requests(&self, repo: &str, pr_number: u64) -> Result<Vec<String>, RemoteError> {
        let value = self
            .request_json(reqwest::Method::GET, &format!("/repos/{repo}/pulls/{pr_number}/requested_reviewers"), &self.token_for(repo), None)
            .await?;
        let logins = value
            .get("users")
            .and_then(|u| u.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|u| u.get("login").and_then(|v| v.as_str()).map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        Ok(logins)
    }

    async fn remove_review_request(&self, repo: &str, pr_number: u64, reviewer: &str) -> Result<(), RemoteError> {
        self.request_json(
            reqwest::Method::DELETE,
            &format!("/repos/{repo}/pulls/{pr_number}/requested_reviewers"),
            &self.token_for(repo),
            Some(serde_json::json!({"reviewers": [reviewer]})),
        )
        .await?;
        Ok(())
    }

    async fn request_reviewers(&self, repo: &str, pr_number: u64, reviewers: &[String]) -> Result<(), RemoteError> {
        self.request_json(
            reqwest::Method::POST,
            &format!("/repos/{repo}/pulls/{pr_number}/requested_reviewers"),
            &self.token_for(repo),
            Some(serde_json::json!({"reviewers": reviewers})),
        )
        .await?;
        Ok(())
    }
}
