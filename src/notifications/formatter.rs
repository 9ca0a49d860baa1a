//! Message Formatter (C5, spec.md §4.4). One formatter per supported event
//! type, each producing a `NotificationRecord` with a deterministic title of
//! the form `<icon> <displayName> (<HH:MM:SS>) <kind> <verb>`.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;

use crate::config::StarMilestonesConfig;
use crate::models::NotificationRecord;

fn is_bot_sender(payload: &Value, review_bot_username: Option<&str>) -> bool {
    let login = payload
        .get("sender")
        .and_then(|s| s.get("login"))
        .and_then(|v| v.as_str());
    match login {
        Some(l) if l == "github-actions[bot]" => true,
        Some(l) => review_bot_username.map(|b| b == l).unwrap_or(false),
        None => false,
    }
}

fn display_name(payload: &Value) -> String {
    payload
        .get("repository")
        .and_then(|r| r.get("full_name"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown/repo")
        .to_string()
}

fn title(icon: &str, display: &str, kind: &str, verb: &str) -> String {
    let clock = Utc::now().format("%H:%M:%S");
    format!("{icon} {display} ({clock}) {kind} {verb}")
}

/// Scans `text` plus any structured user objects under `user_fields` for
/// `@name` mentions and `login` fields, filtering `[bot]`-suffixed names
/// (spec.md §4.4's mention extraction).
fn extract_mentions(text: &str, user_logins: &[&str]) -> Vec<String> {
    let mut mentions = HashSet::new();

    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '@' {
            let rest = &text[i + 1..];
            let end = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '-'))
                .unwrap_or(rest.len());
            let name = &rest[..end];
            if !name.is_empty() && !name.ends_with("[bot]") {
                mentions.insert(name.to_string());
            }
        }
    }

    for login in user_logins {
        if !login.is_empty() && !login.ends_with("[bot]") {
            mentions.insert(login.to_string());
        }
    }

    let mut result: Vec<String> = mentions.into_iter().collect();
    result.sort();
    result
}

/// Formats one webhook event into a notification record, or `None` when the
/// event type has no user-facing notification (filtered bot senders,
/// `fork`/`watch`, or a `star.created` that doesn't hit a milestone).
pub fn format_event(
    event_type: &str,
    payload: &Value,
    review_bot_username: Option<&str>,
    star_milestones: &StarMilestonesConfig,
) -> Option<NotificationRecord> {
    if is_bot_sender(payload, review_bot_username) {
        return None;
    }

    match event_type {
        "fork" | "watch" => None,
        "star" => format_star(payload, star_milestones),
        "push" => format_push(payload),
        "pull_request" => format_pull_request(payload),
        "issues" => format_issues(payload),
        "issue_comment" => format_issue_comment(payload),
        "pull_request_review" => format_pull_request_review(payload),
        "pull_request_review_comment" => format_pull_request_review_comment(payload),
        "release" => format_release(payload),
        "create" => format_create(payload),
        "delete" => format_delete(payload),
        "workflow_run" => format_workflow_run(payload),
        "repository" => format_repository(payload),
        "ping" => format_ping(payload),
        _ => None,
    }
}

fn format_star(payload: &Value, milestones: &StarMilestonesConfig) -> Option<NotificationRecord> {
    if payload.get("action").and_then(|v| v.as_str()) != Some("created") {
        return None;
    }
    let count = payload.get("stargazers_count").and_then(|v| v.as_u64())?;
    if !milestones.enabled || !milestones.targets.contains(&count) {
        return None;
    }
    let display = display_name(payload);
    Some(NotificationRecord {
        title: title("⭐", &display, "里程碑", &format!("🎉 达成 {count} Stars 里程碑！")),
        body: format!("{display} 现在拥有 {count} 个 Star！"),
        url: payload
            .get("repository")
            .and_then(|r| r.get("html_url"))
            .and_then(|v| v.as_str())
            .map(String::from),
        image_url: None,
        mentions: Vec::new(),
        priority: 7,
        metadata: serde_json::json!({"event_type": "star", "count": count}),
        created_at: Utc::now(),
    })
}

fn format_push(payload: &Value) -> Option<NotificationRecord> {
    let display = display_name(payload);
    let branch = payload
        .get("ref")
        .and_then(|v| v.as_str())
        .and_then(|r| r.strip_prefix("refs/heads/"))
        .unwrap_or("unknown");
    let commits = payload.get("commits").and_then(|v| v.as_array());
    let commit_count = commits.map(|c| c.len()).unwrap_or(0);

    let pusher = pusher_login(payload);
    let commit_logins: Vec<&str> = commits
        .into_iter()
        .flatten()
        .filter_map(|c| c.get("author").and_then(|a| a.get("username")).and_then(|v| v.as_str()))
        .collect();

    Some(NotificationRecord {
        title: title("📦", &display, "push", &format!("由 {pusher} 推送了 {commit_count} 个提交到 {branch}")),
        body: commits
            .map(|c| {
                c.iter()
                    .filter_map(|commit| commit.get("message").and_then(|v| v.as_str()))
                    .take(5)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
        url: payload.get("compare").and_then(|v| v.as_str()).map(String::from),
        image_url: None,
        mentions: extract_mentions("", &commit_logins),
        priority: 5,
        metadata: serde_json::json!({"event_type": "push", "branch": branch, "commit_count": commit_count}),
        created_at: Utc::now(),
    })
}

fn pusher_login(payload: &Value) -> String {
    let sender = payload.get("sender").and_then(|s| s.get("login")).and_then(|v| v.as_str());
    if let Some(sender) = sender {
        if sender != "github-actions[bot]" {
            return sender.to_string();
        }
    }
    if let Some(commits) = payload.get("commits").and_then(|v| v.as_array()) {
        if let Some(last) = commits.last() {
            if let Some(name) = last.get("author").and_then(|a| a.get("username")).and_then(|v| v.as_str()) {
                return name.to_string();
            }
        }
    }
    sender.unwrap_or("unknown").to_string()
}

fn format_pull_request(payload: &Value) -> Option<NotificationRecord> {
    let action = payload.get("action").and_then(|v| v.as_str())?;
    let pr = payload.get("pull_request")?;
    let display = display_name(payload);
    let number = pr.get("number").and_then(|v| v.as_u64()).unwrap_or(0);
    let pr_title = pr.get("title").and_then(|v| v.as_str()).unwrap_or("");
    let body = pr.get("body").and_then(|v| v.as_str()).unwrap_or("");
    let login = pr
        .get("user")
        .and_then(|u| u.get("login"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    Some(NotificationRecord {
        title: title("🔀", &display, "PR", &format!("#{number} {pr_title} — {action}")),
        body: body.chars().take(500).collect(),
        url: pr.get("html_url").and_then(|v| v.as_str()).map(String::from),
        image_url: None,
        mentions: extract_mentions(&format!("{pr_title} {body}"), &[login]),
        priority: 6,
        metadata: serde_json::json!({"event_type": "pull_request", "action": action, "number": number}),
        created_at: Utc::now(),
    })
}

fn format_issues(payload: &Value) -> Option<NotificationRecord> {
    let action = payload.get("action").and_then(|v| v.as_str())?;
    let issue = payload.get("issue")?;
    let display = display_name(payload);
    let number = issue.get("number").and_then(|v| v.as_u64()).unwrap_or(0);
    let issue_title = issue.get("title").and_then(|v| v.as_str()).unwrap_or("");
    let body = issue.get("body").and_then(|v| v.as_str()).unwrap_or("");
    let login = issue
        .get("user")
        .and_then(|u| u.get("login"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    Some(NotificationRecord {
        title: title("📋", &display, "Issue", &format!("#{number} {issue_title} — {action}")),
        body: body.chars().take(500).collect(),
        url: issue.get("html_url").and_then(|v| v.as_str()).map(String::from),
        image_url: None,
        mentions: extract_mentions(&format!("{issue_title} {body}"), &[login]),
        priority: 6,
        metadata: serde_json::json!({"event_type": "issues", "action": action, "number": number}),
        created_at: Utc::now(),
    })
}

fn format_issue_comment(payload: &Value) -> Option<NotificationRecord> {
    let action = payload.get("action").and_then(|v| v.as_str())?;
    if action != "created" {
        return None;
    }
    let comment = payload.get("comment")?;
    let issue = payload.get("issue")?;
    let display = display_name(payload);
    let number = issue.get("number").and_then(|v| v.as_u64()).unwrap_or(0);
    let body = comment.get("body").and_then(|v| v.as_str()).unwrap_or("");
    let login = comment
        .get("user")
        .and_then(|u| u.get("login"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    Some(NotificationRecord {
        title: title("💬", &display, "评论", &format!("#{number} 新评论 — by {login}")),
        body: body.chars().take(500).collect(),
        url: comment.get("html_url").and_then(|v| v.as_str()).map(String::from),
        image_url: None,
        mentions: extract_mentions(body, &[login]),
        priority: 4,
        metadata: serde_json::json!({"event_type": "issue_comment", "number": number}),
        created_at: Utc::now(),
    })
}

fn format_pull_request_review(payload: &Value) -> Option<NotificationRecord> {
    let review = payload.get("review")?;
    let pr = payload.get("pull_request")?;
    let display = display_name(payload);
    let number = pr.get("number").and_then(|v| v.as_u64()).unwrap_or(0);
    let state = review.get("state").and_then(|v| v.as_str()).unwrap_or("commented");
    let login = review
        .get("user")
        .and_then(|u| u.get("login"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    Some(NotificationRecord {
        title: title("🔎", &display, "审查", &format!("#{number} 由 {login} 提交 — {state}")),
        body: review.get("body").and_then(|v| v.as_str()).unwrap_or("").chars().take(500).collect(),
        url: review.get("html_url").and_then(|v| v.as_str()).map(String::from),
        image_url: None,
        mentions: extract_mentions("", &[login]),
        priority: 6,
        metadata: serde_json::json!({"event_type": "pull_request_review", "number": number, "state": state}),
        created_at: Utc::now(),
    })
}

fn format_pull_request_review_comment(payload: &Value) -> Option<NotificationRecord> {
    let comment = payload.get("comment")?;
    let pr = payload.get("pull_request")?;
    let display = display_name(payload);
    let number = pr.get("number").and_then(|v| v.as_u64()).unwrap_or(0);
    let body = comment.get("body").and_then(|v| v.as_str()).unwrap_or("");
    let login = comment
        .get("user")
        .and_then(|u| u.get("login"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    Some(NotificationRecord {
        title: title("💬", &display, "行内评论", &format!("#{number} by {login}")),
        body: body.chars().take(500).collect(),
        url: comment.get("html_url").and_then(|v| v.as_str()).map(String::from),
        image_url: None,
        mentions: extract_mentions(body, &[login]),
        priority: 4,
        metadata: serde_json::json!({"event_type": "pull_request_review_comment", "number": number}),
        created_at: Utc::now(),
    })
}

fn format_release(payload: &Value) -> Option<NotificationRecord> {
    let action = payload.get("action").and_then(|v| v.as_str())?;
    if action != "published" {
        return None;
    }
    let release = payload.get("release")?;
    let display = display_name(payload);
    let tag = release.get("tag_name").and_then(|v| v.as_str()).unwrap_or("");

    Some(NotificationRecord {
        title: title("🚀", &display, "发布", &format!("{tag} 已发布")),
        body: release.get("body").and_then(|v| v.as_str()).unwrap_or("").chars().take(500).collect(),
        url: release.get("html_url").and_then(|v| v.as_str()).map(String::from),
        image_url: None,
        mentions: Vec::new(),
        priority: 8,
        metadata: serde_json::json!({"event_type": "release", "tag": tag}),
        created_at: Utc::now(),
    })
}

fn format_create(payload: &Value) -> Option<NotificationRecord> {
    let ref_type = payload.get("ref_type").and_then(|v| v.as_str())?;
    let reference = payload.get("ref").and_then(|v| v.as_str()).unwrap_or("");
    let display = display_name(payload);
    Some(NotificationRecord {
        title: title("🌱", &display, ref_type, &format!("{reference} 已创建")),
        body: String::new(),
        url: None,
        image_url: None,
        mentions: Vec::new(),
        priority: 3,
        metadata: serde_json::json!({"event_type": "create", "ref_type": ref_type}),
        created_at: Utc::now(),
    })
}

fn format_delete(payload: &Value) -> Option<NotificationRecord> {
    let ref_type = payload.get("ref_type").and_then(|v| v.as_str())?;
    let reference = payload.get("ref").and_then(|v| v.as_str()).unwrap_or("");
    let display = display_name(payload);
    Some(NotificationRecord {
        title: title("🗑️", &display, ref_type, &format!("{reference} 已删除")),
        body: String::new(),
        url: None,
        image_url: None,
        mentions: Vec::new(),
        priority: 3,
        metadata: serde_json::json!({"event_type": "delete", "ref_type": ref_type}),
        created_at: Utc::now(),
    })
}

fn format_workflow_run(payload: &Value) -> Option<NotificationRecord> {
    let action = payload.get("action").and_then(|v| v.as_str())?;
    if action != "completed" {
        return None;
    }
    let run = payload.get("workflow_run")?;
    let display = display_name(payload);
    let name = run.get("name").and_then(|v| v.as_str()).unwrap_or("");
    let conclusion = run.get("conclusion").and_then(|v| v.as_str()).unwrap_or("unknown");
    let icon = if conclusion == "success" { "✅" } else { "❌" };

    Some(NotificationRecord {
        title: title(icon, &display, "工作流", &format!("{name} — {conclusion}")),
        body: String::new(),
        url: run.get("html_url").and_then(|v| v.as_str()).map(String::from),
        image_url: None,
        mentions: Vec::new(),
        priority: if conclusion == "success" { 3 } else { 7 },
        metadata: serde_json::json!({"event_type": "workflow_run", "conclusion": conclusion}),
        created_at: Utc::now(),
    })
}

fn format_repository(payload: &Value) -> Option<NotificationRecord> {
    let action = payload.get("action").and_then(|v| v.as_str())?;
    let display = display_name(payload);
    Some(NotificationRecord {
        title: title("🏷️", &display, "仓库", action),
        body: String::new(),
        url: None,
        image_url: None,
        mentions: Vec::new(),
        priority: 4,
        metadata: serde_json::json!({"event_type": "repository", "action": action}),
        created_at: Utc::now(),
    })
}

fn format_ping(payload: &Value) -> Option<NotificationRecord> {
    let display = display_name(payload);
    Some(NotificationRecord {
        title: title("🏓", &display, "ping", "webhook 已连接"),
        body: payload.get("zen").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        url: None,
        image_url: None,
        mentions: Vec::new(),
        priority: 1,
        metadata: serde_json::json!({"event_type": "ping"}),
        created_at: Utc::now(),
    })
}
