//! Permission Store (C3, spec.md §3, §4.3; grounded in
//! `gh_webhook/permission_manager.py`). Two independent permission axes
//! (chat-platform and code-host) per user, persisted as JSON with an
//! atomic temp-file-then-rename write, same pattern as `ConfigManager`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{PermissionError, StorageError};
use crate::models::{ChatPermissionLevel, CodeHostPermissionLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBinding {
    pub chat_user_id: Option<String>,
    pub code_host_login: Option<String>,
    pub chat_level: ChatPermissionLevel,
    pub code_host_level: CodeHostPermissionLevel,
    pub bound_at: Option<DateTime<Utc>>,
}

impl Default for UserBinding {
    fn default() -> Self {
        Self {
            chat_user_id: None,
            code_host_login: None,
            chat_level: ChatPermissionLevel::None,
            code_host_level: CodeHostPermissionLevel::None,
            bound_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedState {
    users: HashMap<String, UserBinding>,
}

/// Introspection snapshot for one user (SPEC_FULL.md §B.4).
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub user_id: String,
    pub chat_level: ChatPermissionLevel,
    pub code_host_level: CodeHostPermissionLevel,
    pub effective_chat_level: ChatPermissionLevel,
    pub is_superuser: bool,
    pub bound: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PermissionStats {
    pub total_users: usize,
    pub bound_users: usize,
    pub superusers: usize,
    pub write_users: usize,
}

/// Operation names that require write-tier permission, mirroring
/// `permission_manager.py`'s `write_operations` set. Kept in lockstep with
/// `ai::tools::WRITE_TOOLS` — every tool name there must appear here.
const WRITE_OPERATIONS: &[&str] = &[
    "github_write",
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

pub struct PermissionStore {
    path: PathBuf,
    state: RwLock<PersistedState>,
    /// Loaded once at startup from the environment; immutable thereafter —
    /// superusers cannot be added or removed at runtime (spec.md §4.3).
    superusers: Vec<String>,
}

impl PermissionStore {
    pub fn load(path: impl AsRef<Path>, superusers: Vec<String>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| StorageError::Io {
                path: path.display().to_string(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| StorageError::Json {
                path: path.display().to_string(),
                source,
            })?
        } else {
            PersistedState::default()
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
            superusers,
        })
    }

    pub fn is_superuser(&self, user_id: &str) -> bool {
        self.superusers.iter().any(|s| s == user_id)
    }

    /// Effective chat permission: superusers are always `Su`; a bound user
    /// with `None` is promoted to `Read` (spec.md §3 effective-permission
    /// rule); otherwise the stored level applies.
    pub fn effective_chat_level(&self, user_id: &str) -> ChatPermissionLevel {
        if self.is_superuser(user_id) {
            return ChatPermissionLevel::Su;
        }
        let state = self.state.read().expect("permission lock poisoned");
        match state.users.get(user_id) {
            Some(binding) if binding.bound_at.is_some() && binding.chat_level == ChatPermissionLevel::None => {
                ChatPermissionLevel::Read
            }
            Some(binding) => binding.chat_level,
            None => ChatPermissionLevel::None,
        }
    }

    pub fn code_host_level(&self, user_id: &str) -> CodeHostPermissionLevel {
        if self.is_superuser(user_id) {
            return CodeHostPermissionLevel::Write;
        }
        let state = self.state.read().expect("permission lock poisoned");
        state
            .users
            .get(user_id)
            .map(|b| b.code_host_level)
            .unwrap_or(CodeHostPermissionLevel::None)
    }

    pub fn require_chat_level(
        &self,
        user_id: &str,
        required: ChatPermissionLevel,
    ) -> Result<(), PermissionError> {
        let actual = self.effective_chat_level(user_id);
        if actual >= required {
            Ok(())
        } else {
            Err(PermissionError::Denied {
                required: format!("{required:?}"),
                actual: format!("{actual:?}"),
            })
        }
    }

    /// Whether `operation` is in the write tier, i.e. requires
    /// `CodeHostPermissionLevel::Write` (or chat `Write`/`Su`) rather than
    /// `Read` (spec.md §4.3, §4.8's write-op UX protocol).
    pub fn is_write_operation(operation: &str) -> bool {
        WRITE_OPERATIONS.contains(&operation)
    }

    /// `permission_manager.py`'s `check_mcp_write_permission`: superusers
    /// bypass, everyone else needs code-host `Write`.
    pub fn check_write_permission(&self, user_id: &str, operation: &str) -> Result<(), PermissionError> {
        if !Self::is_write_operation(operation) {
            return Ok(());
        }
        if self.is_superuser(user_id) {
            return Ok(());
        }
        if self.code_host_level(user_id) >= CodeHostPermissionLevel::Write {
            return Ok(());
        }
        Err(PermissionError::Denied {
            required: "Write".to_string(),
            actual: format!("{:?}", self.code_host_level(user_id)),
        })
    }

    /// SU-gated: binds a chat identity to a code-host login and sets
    /// explicit permission levels.
    pub fn bind_user(
        &self,
        actor: &str,
        user_id: &str,
        code_host_login: Option<String>,
        chat_level: ChatPermissionLevel,
        code_host_level: CodeHostPermissionLevel,
    ) -> Result<(), PermissionError> {
        if !self.is_superuser(actor) {
            return Err(PermissionError::Denied {
                required: "Su".to_string(),
                actual: format!("{:?}", self.effective_chat_level(actor)),
            });
        }
        let mut state = self.state.write().expect("permission lock poisoned");
        let binding = state.users.entry(user_id.to_string()).or_default();
        binding.code_host_login = code_host_login;
        binding.chat_level = chat_level;
        binding.code_host_level = code_host_level;
        binding.bound_at = Some(Utc::now());
        drop(state);
        self.persist()
    }

    pub fn get_user_info(&self, user_id: &str) -> UserInfo {
        let state = self.state.read().expect("permission lock poisoned");
        let binding = state.users.get(user_id).cloned().unwrap_or_default();
        UserInfo {
            user_id: user_id.to_string(),
            chat_level: binding.chat_level,
            code_host_level: binding.code_host_level,
            effective_chat_level: self.effective_chat_level(user_id),
            is_superuser: self.is_superuser(user_id),
            bound: binding.bound_at.is_some(),
        }
    }

    pub fn get_all_users(&self) -> Vec<UserInfo> {
        let state = self.state.read().expect("permission lock poisoned");
        state
            .users
            .keys()
            .map(|id| self.get_user_info(id))
            .collect()
    }

    pub fn get_stats(&self) -> PermissionStats {
        let state = self.state.read().expect("permission lock poisoned");
        let bound_users = state.users.values().filter(|b| b.bound_at.is_some()).count();
        let write_users = state
            .users
            .values()
            .filter(|b| b.code_host_level >= CodeHostPermissionLevel::Write)
            .count();
        PermissionStats {
            total_users: state.users.len(),
            bound_users,
            superusers: self.superusers.len(),
            write_users,
        }
    }

    fn persist(&self) -> Result<(), PermissionError> {
        let state = self.state.read().expect("permission lock poisoned");
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(&*state)
            .map_err(|e| PermissionError::Persistence(e.to_string()))?;
        drop(state);
        std::fs::write(&tmp, body).map_err(|e| PermissionError::Persistence(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| PermissionError::Persistence(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PermissionStore {
        let dir = std::env::temp_dir().join(format!("gh-relay-core-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        PermissionStore::load(dir.join("permissions.json"), vec!["su1".to_string()]).unwrap()
    }

    #[test]
    fn unbound_user_has_none() {
        let store = store();
        assert_eq!(store.effective_chat_level("nobody"), ChatPermissionLevel::None);
    }

    #[test]
    fn superuser_is_always_su() {
        let store = store();
        assert_eq!(store.effective_chat_level("su1"), ChatPermissionLevel::Su);
    }

    #[test]
    fn bound_none_promotes_to_read() {
        let store = store();
        store
            .bind_user("su1", "alice", None, ChatPermissionLevel::None, CodeHostPermissionLevel::None)
            .unwrap();
        assert_eq!(store.effective_chat_level("alice"), ChatPermissionLevel::Read);
    }

    #[test]
    fn non_su_cannot_bind() {
        let store = store();
        assert!(store
            .bind_user("alice", "bob", None, ChatPermissionLevel::Write, CodeHostPermissionLevel::Write)
            .is_err());
    }

    #[test]
    fn write_operation_requires_write_tier() {
        let store = store();
        store
            .bind_user("su1", "alice", None, ChatPermissionLevel::Write, CodeHostPermissionLevel::None)
            .unwrap();
        assert!(store.check_write_permission("alice", "create_issue").is_err());
        store
            .bind_user("su1", "alice", None, ChatPermissionLevel::Write, CodeHostPermissionLevel::Write)
            .unwrap();
        assert!(store.check_write_permission("alice", "create_issue").is_ok());
    }

    #[test]
    fn read_only_operation_never_denied() {
        let store = store();
        assert!(store.check_write_permission("nobody", "ai_chat").is_ok());
    }
}
