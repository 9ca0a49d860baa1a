//! Context Store (C10, spec.md §3, §6). Owns all `ConversationContext` and
//! `Message` values; persists each context as its own JSON file with an
//! atomic temp-file-then-rename write, same pattern as `PermissionStore`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use crate::errors::StorageError;
use crate::models::{ConversationContext, ContextKind, Message, MessageRole};

/// Lightweight summary of a context returned by `find_related` — never the
/// full message history (spec.md §4.8's `find_related_contexts`).
#[derive(Debug, Clone, Serialize)]
pub struct RelatedContext {
    pub context_id: String,
    pub repository: Option<String>,
    pub issue_or_pr_id: Option<String>,
    pub message_count: usize,
}

const MAX_MESSAGES: usize = 100;
const MAX_CONTEXTS: usize = 1000;
const TTL_HOURS: i64 = 24;
/// First N messages of role `system` are pinned and survive eviction
/// (SPEC_FULL.md §B.7).
const STICKY_SYSTEM_PREFIX: usize = 5;

pub struct ContextStore {
    dir: PathBuf,
    contexts: Mutex<HashMap<String, Arc<Mutex<ConversationContext>>>>,
}

impl ContextStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            dir,
            contexts: Mutex::new(HashMap::new()),
        })
    }

    fn file_path(&self, context_id: &str) -> PathBuf {
        self.dir.join(format!("{context_id}.json"))
    }

    fn load_from_disk(&self, context_id: &str) -> Option<ConversationContext> {
        let path = self.file_path(context_id);
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Fetches an existing context or creates a fresh one, evicting the
    /// least-recently-active context if the process-wide cap would be
    /// exceeded (spec.md §3: `N_CTX = 1000`, LRU eviction).
    pub fn fetch_or_create(
        &self,
        context_id: &str,
        kind: ContextKind,
        group_id: Option<String>,
        user_id: Option<String>,
        repository: Option<String>,
        issue_or_pr_id: Option<String>,
    ) -> Arc<Mutex<ConversationContext>> {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = contexts.get(context_id) {
            return Arc::clone(existing);
        }
        drop(contexts);

        let loaded = self.load_from_disk(context_id);
        let context = loaded.unwrap_or_else(|| {
            let now = Utc::now();
            ConversationContext {
                context_id: context_id.to_string(),
                context_type: kind,
                messages: Vec::new(),
                created_at: now,
                last_activity: now,
                metadata: HashMap::new(),
                group_id,
                user_id,
                repository,
                issue_or_pr_id,
                max_messages: MAX_MESSAGES,
            }
        });

        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_if_over_cap(&mut contexts);
        let handle = Arc::new(Mutex::new(context));
        contexts.insert(context_id.to_string(), Arc::clone(&handle));
        handle
    }

    fn evict_if_over_cap(&self, contexts: &mut HashMap<String, Arc<Mutex<ConversationContext>>>) {
        if contexts.len() < MAX_CONTEXTS {
            return;
        }
        let lru_id = contexts
            .iter()
            .min_by_key(|(_, c)| c.lock().unwrap_or_else(|e| e.into_inner()).last_activity)
            .map(|(id, _)| id.clone());
        if let Some(id) = lru_id {
            contexts.remove(&id);
        }
    }

    /// Appends a message, applies the eviction policy on overflow, bumps
    /// `last_activity`, and persists (write-through, spec.md §5).
    pub fn append_message(
        &self,
        handle: &Arc<Mutex<ConversationContext>>,
        message: Message,
    ) -> Result<(), StorageError> {
        {
            let mut context = handle.lock().unwrap_or_else(|e| e.into_inner());
            context.messages.push(message);
            evict_overflow(&mut context.messages, context.max_messages);
            context.last_activity = Utc::now();
        }
        self.persist(handle)
    }

    pub fn persist(&self, handle: &Arc<Mutex<ConversationContext>>) -> Result<(), StorageError> {
        let context = handle.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.file_path(&context.context_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(&*context).map_err(|source| StorageError::Json {
            path: path.display().to_string(),
            source,
        })?;
        drop(context);
        std::fs::write(&tmp, body).map_err(|source| StorageError::Io {
            path: tmp.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StorageError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// Removes the message with `message_id`, plus the immediately
    /// following message if its `reply_to_message_id` metadata points back
    /// at it (user message + the assistant reply it triggered). Used for
    /// chat message recall and comment-deletion pruning (spec.md §4.12).
    /// Returns the removed messages; persists on any removal.
    pub fn remove_message(&self, handle: &Arc<Mutex<ConversationContext>>, message_id: &str) -> Vec<Message> {
        let mut removed = Vec::new();
        {
            let mut context = handle.lock().unwrap_or_else(|e| e.into_inner());
            let mut i = 0;
            while i < context.messages.len() {
                if context.messages[i].message_id.as_deref() == Some(message_id) {
                    removed.push(context.messages.remove(i));
                    if i < context.messages.len()
                        && context.messages[i]
                            .metadata
                            .get("reply_to_message_id")
                            .and_then(|v| v.as_str())
                            == Some(message_id)
                    {
                        removed.push(context.messages.remove(i));
                    }
                } else {
                    i += 1;
                }
            }
        }
        if !removed.is_empty() {
            let _ = self.persist(handle);
        }
        removed
    }

    /// Removes contexts whose `last_activity` is older than the TTL.
    pub fn sweep_expired(&self) {
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = Utc::now() - chrono::Duration::hours(TTL_HOURS);
        contexts.retain(|_, c| c.lock().unwrap_or_else(|e| e.into_inner()).last_activity > cutoff);
    }

    /// Contexts whose `repository` matches `filter`, or every in-memory
    /// context when `filter` is `None`. Only contexts currently held in
    /// memory are considered — contexts swept or never loaded this run are
    /// not searched (spec.md §4.8's `find_related_contexts`).
    pub fn find_related(&self, filter: Option<&str>) -> Vec<RelatedContext> {
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts
            .values()
            .filter_map(|handle| {
                let context = handle.lock().unwrap_or_else(|e| e.into_inner());
                let matches = match filter {
                    Some(repo) => context.repository.as_deref() == Some(repo),
                    None => true,
                };
                matches.then(|| RelatedContext {
                    context_id: context.context_id.clone(),
                    repository: context.repository.clone(),
                    issue_or_pr_id: context.issue_or_pr_id.clone(),
                    message_count: context.messages.len(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Evicts oldest non-sticky messages first, keeping messages `[0..5)` that
/// are `role == system` pinned (SPEC_FULL.md §B.7).
fn evict_overflow(messages: &mut Vec<Message>, cap: usize) {
    while messages.len() > cap {
        let evict_at = messages
            .iter()
            .enumerate()
            .find(|(i, m)| !(*i < STICKY_SYSTEM_PREFIX && m.role == MessageRole::System))
            .map(|(i, _)| i);
        match evict_at {
            Some(i) => {
                messages.remove(i);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ContextStore {
        let dir = std::env::temp_dir().join(format!("gh-relay-core-ctx-{}", uuid::Uuid::new_v4()));
        ContextStore::new(dir).unwrap()
    }

    #[test]
    fn fetch_or_create_returns_same_handle() {
        let store = store();
        let a = store.fetch_or_create("ctx1", ContextKind::General, None, None, None, None);
        let b = store.fetch_or_create("ctx1", ContextKind::General, None, None, None, None);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn append_persists_to_disk() {
        let store = store();
        let handle = store.fetch_or_create("ctx1", ContextKind::General, None, None, None, None);
        store.append_message(&handle, Message::new(MessageRole::User, "hi")).unwrap();
        let path = store.file_path("ctx1");
        assert!(path.exists());
    }

    /// Property 9 (spec.md §8): persisting the same context twice yields
    /// byte-identical files up to `last_activity`.
    #[test]
    fn persisting_twice_is_idempotent_up_to_last_activity() {
        let store = store();
        let handle = store.fetch_or_create("ctx1", ContextKind::General, None, None, None, None);
        store.append_message(&handle, Message::new(MessageRole::User, "hi")).unwrap();

        let path = store.file_path("ctx1");
        let first = std::fs::read_to_string(&path).unwrap();
        store.persist(&handle).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();

        let strip_last_activity = |raw: &str| -> serde_json::Value {
            let mut v: serde_json::Value = serde_json::from_str(raw).unwrap();
            v.as_object_mut().unwrap().remove("last_activity");
            v
        };
        assert_eq!(strip_last_activity(&first), strip_last_activity(&second));
    }

    #[test]
    fn sticky_system_messages_survive_eviction() {
        let mut messages = vec![Message::new(MessageRole::System, "sys")];
        for i in 0..MAX_MESSAGES + 10 {
            messages.push(Message::new(MessageRole::User, format!("m{i}")));
        }
        evict_overflow(&mut messages, MAX_MESSAGES);
        assert_eq!(messages.len(), MAX_MESSAGES);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[0].content, "sys");
    }
}
