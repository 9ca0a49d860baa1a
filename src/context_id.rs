//! Deterministic context-id derivation (spec.md §4.12), shared by the AI
//! Orchestrator (to fetch-or-create a `ConversationContext`) and the
//! Comment-Reply Reconciler (to locate the context a code-host comment
//! belongs to).

use md5::{Digest, Md5};

use crate::models::ContextKind;

/// Parameters used to derive a context id; which fields matter depends on
/// `kind`.
#[derive(Debug, Clone, Default)]
pub struct ContextIdParams {
    pub group_id: Option<String>,
    pub user_id: Option<String>,
    pub owner_repo: Option<String>,
    pub pr_or_issue: Option<String>,
}

pub fn derive_context_id(kind: ContextKind, params: &ContextIdParams) -> String {
    match kind {
        ContextKind::ChatGroup => format!(
            "qq_group_{}_{}",
            params.group_id.as_deref().unwrap_or(""),
            params.user_id.as_deref().unwrap_or("")
        ),
        ContextKind::ChatPrivate => format!("qq_private_{}", params.user_id.as_deref().unwrap_or("")),
        ContextKind::CodeHostPr => format!(
            "github_pr_{}_{}",
            params.owner_repo.as_deref().unwrap_or("").replace('/', "_"),
            params.pr_or_issue.as_deref().unwrap_or("")
        ),
        ContextKind::CodeHostIssue => format!(
            "github_issue_{}_{}",
            params.owner_repo.as_deref().unwrap_or("").replace('/', "_"),
            params.pr_or_issue.as_deref().unwrap_or("")
        ),
        ContextKind::CodeHostPrReview | ContextKind::General => fallback_id(kind, params),
    }
}

fn fallback_id(kind: ContextKind, params: &ContextIdParams) -> String {
    let kind_str = match kind {
        ContextKind::ChatGroup => "chat_group",
        ContextKind::ChatPrivate => "chat_private",
        ContextKind::CodeHostPr => "github_pr",
        ContextKind::CodeHostIssue => "github_issue",
        ContextKind::CodeHostPrReview => "github_pr_review",
        ContextKind::General => "general",
    };
    let mut hasher = Md5::new();
    hasher.update(params.group_id.as_deref().unwrap_or(""));
    hasher.update(params.user_id.as_deref().unwrap_or(""));
    hasher.update(params.owner_repo.as_deref().unwrap_or(""));
    hasher.update(params.pr_or_issue.as_deref().unwrap_or(""));
    let digest = hasher.finalize();
    let hex = hex::encode(digest);
    format!("{kind_str}_{}", &hex[..8])
}
