//! Tool Registry (C9, spec.md §4.6). Declarative tool schema, parameter
//! coercion/validation, and the sanitization denylist from §4.6's "rejects
//! `../`, `<script`, `javascript:`, …" rule.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::errors::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    CodeHost,
    Context,
    Search,
    Utility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub param_type: ParamType,
    pub required: bool,
    pub description: &'static str,
    pub default: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub category: ToolCategory,
    pub description: &'static str,
    pub parameters: Vec<(&'static str, ParamSpec)>,
    /// Abstract permission tags (`ai_chat`, `github_read`, `github_write`,
    /// `user_manage`, `system_admin`) per spec.md §4.6.
    pub required_permissions: &'static [&'static str],
}

/// Write-class tools (spec.md §4.8) — require chat WRITE or code-host-bound
/// WRITE, and drive the "Executing…" chat UX protocol.
pub const WRITE_TOOLS: &[&str] = &[
    "create_issue",
    "update_issue",
    "close_issue",
    "reopen_issue",
    "create_pull_request",
    "update_pull_request",
    "merge_pull_request",
    "create_issue_comment",
    "update_comment",
    "delete_comment",
    "create_label",
    "add_label",
    "remove_label",
    "assign_issue",
    "unassign_issue",
    "request_review",
];

fn p(param_type: ParamType, required: bool, description: &'static str) -> ParamSpec {
    ParamSpec { param_type, required, description, default: None }
}

fn tool_catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "get_issue",
            category: ToolCategory::CodeHost,
            description: "Fetch an issue by repository and number.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("number", p(ParamType::Integer, true, "issue number")),
            ],
            required_permissions: &["github_read"],
        },
        ToolSpec {
            name: "create_issue",
            category: ToolCategory::CodeHost,
            description: "Create a new issue.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("title", p(ParamType::String, true, "issue title")),
                ("body", p(ParamType::String, false, "issue body")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "update_issue",
            category: ToolCategory::CodeHost,
            description: "Update an existing issue's title/body.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("number", p(ParamType::Integer, true, "issue number")),
                ("title", p(ParamType::String, false, "new title")),
                ("body", p(ParamType::String, false, "new body")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "close_issue",
            category: ToolCategory::CodeHost,
            description: "Close an issue.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("number", p(ParamType::Integer, true, "issue number")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "reopen_issue",
            category: ToolCategory::CodeHost,
            description: "Reopen a closed issue.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("number", p(ParamType::Integer, true, "issue number")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "create_issue_comment",
            category: ToolCategory::CodeHost,
            description: "Post a comment on an issue or pull request.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("number", p(ParamType::Integer, true, "issue or PR number")),
                ("body", p(ParamType::String, true, "comment text")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "update_comment",
            category: ToolCategory::CodeHost,
            description: "Edit an existing comment.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("comment_id", p(ParamType::Integer, true, "comment id")),
                ("body", p(ParamType::String, true, "new comment text")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "delete_comment",
            category: ToolCategory::CodeHost,
            description: "Delete a comment.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("comment_id", p(ParamType::Integer, true, "comment id")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "create_label",
            category: ToolCategory::CodeHost,
            description: "Create a repository label.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("name", p(ParamType::String, true, "label name")),
                ("color", p(ParamType::String, false, "hex color, no #")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "add_label",
            category: ToolCategory::CodeHost,
            description: "Add one or more labels to an issue or PR.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("number", p(ParamType::Integer, true, "issue or PR number")),
                ("labels", p(ParamType::Array, true, "label names")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "remove_label",
            category: ToolCategory::CodeHost,
            description: "Remove a label from an issue or PR.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("number", p(ParamType::Integer, true, "issue or PR number")),
                ("label", p(ParamType::String, true, "label name")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "create_pull_request",
            category: ToolCategory::CodeHost,
            description: "Create a new pull request.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("title", p(ParamType::String, true, "PR title")),
                ("head", p(ParamType::String, true, "head branch")),
                ("base", p(ParamType::String, true, "base branch")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "update_pull_request",
            category: ToolCategory::CodeHost,
            description: "Update an existing pull request's title/body.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("number", p(ParamType::Integer, true, "PR number")),
                ("title", p(ParamType::String, false, "new title")),
                ("body", p(ParamType::String, false, "new body")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "merge_pull_request",
            category: ToolCategory::CodeHost,
            description: "Merge a pull request.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("number", p(ParamType::Integer, true, "PR number")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "assign_issue",
            category: ToolCategory::CodeHost,
            description: "Assign a user to an issue or pull request.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("number", p(ParamType::Integer, true, "issue or PR number")),
                ("assignee", p(ParamType::String, true, "user login")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "unassign_issue",
            category: ToolCategory::CodeHost,
            description: "Remove a user's assignment from an issue or pull request.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("number", p(ParamType::Integer, true, "issue or PR number")),
                ("assignee", p(ParamType::String, true, "user login")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "request_review",
            category: ToolCategory::CodeHost,
            description: "Request review from a user on a pull request.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("number", p(ParamType::Integer, true, "PR number")),
                ("reviewer", p(ParamType::String, true, "reviewer login")),
            ],
            required_permissions: &["github_write"],
        },
        ToolSpec {
            name: "list_issues",
            category: ToolCategory::CodeHost,
            description: "List issues in a repository.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("state", p(ParamType::String, false, "open|closed|all")),
            ],
            required_permissions: &["github_read"],
        },
        ToolSpec {
            name: "search_code",
            category: ToolCategory::Search,
            description: "Search code across a repository.",
            parameters: vec![
                ("owner", p(ParamType::String, true, "repository owner")),
                ("repo", p(ParamType::String, true, "repository name")),
                ("query", p(ParamType::String, true, "search query")),
            ],
            required_permissions: &["github_read"],
        },
        ToolSpec {
            name: "get_context_stats",
            category: ToolCategory::Context,
            description: "Return message/tool-call counts for the current conversation.",
            parameters: vec![],
            required_permissions: &["ai_chat"],
        },
        ToolSpec {
            name: "find_related_contexts",
            category: ToolCategory::Context,
            description: "Find other conversations referencing the same repository or PR.",
            parameters: vec![
                ("repository", p(ParamType::String, false, "owner/repo filter")),
            ],
            required_permissions: &["ai_chat"],
        },
        ToolSpec {
            name: "get_user_info",
            category: ToolCategory::Utility,
            description: "Look up a user's permission levels and binding status.",
            parameters: vec![("user_id", p(ParamType::String, true, "chat user id"))],
            required_permissions: &["user_manage"],
        },
        ToolSpec {
            name: "get_stats",
            category: ToolCategory::Utility,
            description: "Return aggregate permission-store statistics.",
            parameters: vec![],
            required_permissions: &["system_admin"],
        },
    ]
}

static SANITIZE_DENYLIST: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\.\./",
        r"(?i)<script",
        r"(?i)javascript:",
        r"(?i)eval\(",
        r"(?i)exec\(",
        r"__import__",
        r"subprocess",
        r"\bos\.",
    ]
    .iter()
    .map(|pat| Regex::new(pat).expect("denylist patterns are valid"))
    .collect()
});

const MAX_STRING_LEN: usize = 1000;

fn sanitize_string(raw: &str) -> Result<String, OrchestratorError> {
    for pattern in SANITIZE_DENYLIST.iter() {
        if pattern.is_match(raw) {
            return Err(OrchestratorError::Sanitized(format!(
                "parameter matched denylist pattern: {}",
                pattern.as_str()
            )));
        }
    }
    let cleaned: String = raw.chars().filter(|c| !"<>\"'\\/".contains(*c)).collect();
    Ok(cleaned.chars().take(MAX_STRING_LEN).collect())
}

fn coerce(param_type: ParamType, value: &Value) -> Option<Value> {
    match (param_type, value) {
        (ParamType::String, Value::String(_)) => Some(value.clone()),
        (ParamType::String, v) => Some(Value::String(v.to_string())),
        (ParamType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
        (ParamType::Integer, Value::String(s)) => s.parse::<i64>().ok().map(|n| Value::from(n)),
        (ParamType::Number, Value::Number(_)) => Some(value.clone()),
        (ParamType::Number, Value::String(s)) => s.parse::<f64>().ok().map(|n| Value::from(n)),
        (ParamType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (ParamType::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (ParamType::Array, Value::Array(_)) => Some(value.clone()),
        _ => None,
    }
}

/// Returns the tool's expected signature as a human-readable string —
/// required parameters first, then optional ones with defaults — so the
/// validation error is self-correcting feedback the LLM can read
/// (spec.md §4.6).
fn signature_hint(spec: &ToolSpec) -> String {
    let mut required: Vec<String> = Vec::new();
    let mut optional: Vec<String> = Vec::new();
    for (name, param) in &spec.parameters {
        if param.required {
            required.push(format!("{name}: {:?}", param.param_type));
        } else {
            optional.push(format!("{name}: {:?} = {:?}", param.param_type, param.default));
        }
    }
    format!(
        "{}({}{}{})",
        spec.name,
        required.join(", "),
        if !required.is_empty() && !optional.is_empty() { ", " } else { "" },
        optional.join(", ")
    )
}

pub struct ToolRegistry {
    tools: HashMap<&'static str, ToolSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        let tools = tool_catalog().into_iter().map(|t| (t.name, t)).collect();
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values()
    }

    /// Validates and coerces `params` against the tool's declared schema,
    /// rejecting unknown tools, unknown parameters, missing required
    /// parameters, and coercion failures (spec.md §4.6).
    pub fn validate(
        &self,
        name: &str,
        params: &serde_json::Map<String, Value>,
    ) -> Result<HashMap<String, Value>, OrchestratorError> {
        let spec = self
            .tools
            .get(name)
            .ok_or_else(|| OrchestratorError::UnknownTool(name.to_string()))?;

        let known: std::collections::HashSet<&str> = spec.parameters.iter().map(|(n, _)| *n).collect();
        for key in params.keys() {
            if !known.contains(key.as_str()) {
                return Err(OrchestratorError::InvalidParameters {
                    tool: name.to_string(),
                    reason: format!("unknown parameter '{key}'. expected signature: {}", signature_hint(spec)),
                });
            }
        }

        let mut result = HashMap::new();
        for (param_name, param_spec) in &spec.parameters {
            match params.get(*param_name) {
                Some(raw) => {
                    let coerced = coerce(param_spec.param_type, raw).ok_or_else(|| OrchestratorError::InvalidParameters {
                        tool: name.to_string(),
                        reason: format!(
                            "parameter '{param_name}' could not be coerced to {:?}. expected signature: {}",
                            param_spec.param_type,
                            signature_hint(spec)
                        ),
                    })?;
                    let sanitized = match coerced {
                        Value::String(s) => Value::String(sanitize_string(&s)?),
                        other => other,
                    };
                    result.insert((*param_name).to_string(), sanitized);
                }
                None if param_spec.required => {
                    return Err(OrchestratorError::InvalidParameters {
                        tool: name.to_string(),
                        reason: format!("missing required parameter '{param_name}'. expected signature: {}", signature_hint(spec)),
                    });
                }
                None => {
                    if let Some(default) = &param_spec.default {
                        result.insert((*param_name).to_string(), default.clone());
                    }
                }
            }
        }

        Ok(result)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_is_rejected() {
        let registry = ToolRegistry::new();
        let params = serde_json::Map::new();
        assert!(matches!(
            registry.validate("does_not_exist", &params),
            Err(OrchestratorError::UnknownTool(_))
        ));
    }

    #[test]
    fn missing_required_param_is_rejected() {
        let registry = ToolRegistry::new();
        let params = serde_json::Map::new();
        assert!(registry.validate("create_issue", &params).is_err());
    }

    #[test]
    fn string_digit_is_coerced_to_integer() {
        let registry = ToolRegistry::new();
        let mut params = serde_json::Map::new();
        params.insert("owner".to_string(), Value::String("o".to_string()));
        params.insert("repo".to_string(), Value::String("r".to_string()));
        params.insert("number".to_string(), Value::String("42".to_string()));
        let result = registry.validate("get_issue", &params).unwrap();
        assert_eq!(result["number"], Value::from(42));
    }

    #[test]
    fn denylist_pattern_is_rejected() {
        let registry = ToolRegistry::new();
        let mut params = serde_json::Map::new();
        params.insert("owner".to_string(), Value::String("o".to_string()));
        params.insert("repo".to_string(), Value::String("r".to_string()));
        params.insert("title".to_string(), Value::String("<script>evil()</script>".to_string()));
        assert!(registry.validate("create_issue", &params).is_err());
    }

    #[test]
    fn every_write_tool_is_declared_in_the_catalog() {
        let registry = ToolRegistry::new();
        for name in WRITE_TOOLS {
            assert!(registry.get(name).is_some(), "WRITE_TOOLS entry '{name}' has no catalog entry");
        }
    }

    #[test]
    fn unknown_param_is_rejected() {
        let registry = ToolRegistry::new();
        let mut params = serde_json::Map::new();
        params.insert("owner".to_string(), Value::String("o".to_string()));
        params.insert("repo".to_string(), Value::String("r".to_string()));
        params.insert("number".to_string(), Value::from(1));
        params.insert("bogus".to_string(), Value::String("x".to_string()));
        assert!(registry.validate("get_issue", &params).is_err());
    }
}
