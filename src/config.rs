//! Application configuration: JSON file merged over compiled-in defaults
//! (spec.md §4.3, `gh_webhook/conf.py`'s `DEFAULT_CONFIG`/`_merge_config`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::errors::StorageError;
use crate::models::RepositoryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarMilestonesConfig {
    pub enabled: bool,
    pub targets: Vec<u64>,
}

impl Default for StarMilestonesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            targets: vec![100, 200, 300, 400, 500, 600, 666, 700, 800, 900, 1000],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DebugChannelConfig {
    pub enabled: bool,
    pub target_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    pub token: String,
    pub api_base_url: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base_url: "https://api.github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub enabled: bool,
    pub provider: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".to_string(),
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 2000,
            temperature: 0.3,
        }
    }
}

/// Top-level application configuration (spec.md §4.3 + SPEC_FULL.md §B.2-3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub port: u16,
    pub aggregation_delay_secs: u64,
    pub max_retry_attempts: u32,
    pub retry_delay_secs: u64,
    #[serde(default)]
    pub star_milestones: StarMilestonesConfig,
    #[serde(default)]
    pub debug_channel: DebugChannelConfig,
    #[serde(default)]
    pub user_mappings: HashMap<String, String>,
    #[serde(default)]
    pub repo_mappings: HashMap<String, RepositoryConfig>,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 5080,
            aggregation_delay_secs: 5,
            max_retry_attempts: 3,
            retry_delay_secs: 2,
            star_milestones: StarMilestonesConfig::default(),
            debug_channel: DebugChannelConfig::default(),
            user_mappings: HashMap::new(),
            repo_mappings: HashMap::new(),
            github: GithubConfig::default(),
            ai: AiConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn get_repo_config(&self, repo_name: &str) -> Option<&RepositoryConfig> {
        self.repo_mappings.get(repo_name)
    }

    pub fn is_repo_enabled(&self, repo_name: &str) -> bool {
        self.repo_mappings
            .get(repo_name)
            .map(|r| r.enabled)
            .unwrap_or(false)
    }

    /// Applies secret overrides from the process environment, following the
    /// teacher's `RateLimitConfig::from_env()` idiom: env vars win over file
    /// contents, file contents win over compiled-in defaults.
    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            self.github.token = token;
        }
        if let Ok(api_key) = std::env::var("AI_API_KEY") {
            self.ai.api_key = api_key;
        }
    }
}

/// Owns the on-disk config file and the in-memory `AppConfig`. `reload()`
/// re-reads the file and merges it over the compiled-in defaults again; no
/// filesystem watcher is started (SPEC_FULL.md §B.1 Open Question decision).
pub struct ConfigManager {
    path: PathBuf,
    config: RwLock<AppConfig>,
}

impl ConfigManager {
    /// Loads `path`, creating it with the compiled-in defaults if absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let config = Self::read_merged(&path)?;
        Ok(Self {
            path,
            config: RwLock::new(config),
        })
    }

    fn read_merged(path: &Path) -> Result<AppConfig, StorageError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| StorageError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let user: serde_json::Value =
                serde_json::from_str(&raw).map_err(|source| StorageError::Json {
                    path: path.display().to_string(),
                    source,
                })?;
            // Merge user JSON over the serialized default, mirroring
            // `_merge_config`: explicit user keys win, missing keys fall
            // back to the default.
            let default = serde_json::to_value(AppConfig::default()).expect("serializable");
            let merged = merge_json(default, user);
            serde_json::from_value(merged).map_err(|source| StorageError::Json {
                path: path.display().to_string(),
                source,
            })?
        } else {
            let default = AppConfig::default();
            Self::write_atomic(path, &default)?;
            default
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Re-reads the config file from disk, replacing the in-memory config.
    /// Callers invoke this explicitly (e.g. on an admin command); there is
    /// no background watcher.
    pub fn reload(&self) -> Result<(), StorageError> {
        let fresh = Self::read_merged(&self.path)?;
        *self.config.write().expect("config lock poisoned") = fresh;
        Ok(())
    }

    pub fn snapshot(&self) -> AppConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub fn save(&self, config: AppConfig) -> Result<(), StorageError> {
        Self::write_atomic(&self.path, &config)?;
        *self.config.write().expect("config lock poisoned") = config;
        Ok(())
    }

    fn write_atomic(path: &Path, config: &AppConfig) -> Result<(), StorageError> {
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(config).expect("serializable");
        std::fs::write(&tmp, body).map_err(|source| StorageError::Io {
            path: tmp.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| StorageError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }
}

/// Recursively merges `user` over `default`: objects merge key-by-key,
/// any other value in `user` overrides `default` outright, and a missing
/// key in `user` falls back to `default`.
fn merge_json(default: serde_json::Value, user: serde_json::Value) -> serde_json::Value {
    match (default, user) {
        (serde_json::Value::Object(mut default_map), serde_json::Value::Object(user_map)) => {
            for (key, user_value) in user_map {
                let merged = match default_map.remove(&key) {
                    Some(default_value) => merge_json(default_value, user_value),
                    None => user_value,
                };
                default_map.insert(key, merged);
            }
            serde_json::Value::Object(default_map)
        }
        (_, user_value) => user_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_fills_missing_keys_from_defaults() {
        let default = serde_json::json!({"port": 5080, "ai": {"enabled": false, "model": "gpt-3.5-turbo"}});
        let user = serde_json::json!({"ai": {"enabled": true}});
        let merged = merge_json(default, user);
        assert_eq!(merged["port"], 5080);
        assert_eq!(merged["ai"]["enabled"], true);
        assert_eq!(merged["ai"]["model"], "gpt-3.5-turbo");
    }

    #[test]
    fn load_creates_default_file_when_absent() {
        let dir = std::env::temp_dir().join(format!("gh-relay-core-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        let manager = ConfigManager::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(manager.snapshot().port, 5080);
        std::fs::remove_dir_all(&dir).ok();
    }
}
