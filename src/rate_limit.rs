use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::Instant;

/// Configurable rate limit values for the four buckets named in spec.md §3
/// (`RateLimitBucket`) / §4.2. All read from environment variables with
/// sensible defaults.
///
/// Environment variables:
/// - `RATE_LIMIT_GENERIC` — Max generic chat-command invocations per hour per user (default: 100)
/// - `RATE_LIMIT_AI_CALL` — Max AI orchestrator turns per hour per user (default: 50)
/// - `RATE_LIMIT_TOOL_CALL` — Max tool-call executions per hour per user (default: 30)
/// - `RATE_LIMIT_BURST` — Max requests per minute per user, any bucket (default: 10)
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Generic chat-command invocations per hour per user
    pub generic_max: usize,
    pub generic_window_secs: u64,
    /// AI orchestrator turns per hour per user
    pub ai_call_max: usize,
    pub ai_call_window_secs: u64,
    /// Tool-call executions per hour per user
    pub tool_call_max: usize,
    pub tool_call_window_secs: u64,
    /// Burst ceiling per minute per user, applied in addition to the
    /// per-bucket hourly limit above
    pub burst_max: usize,
    pub burst_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            generic_max: 100,
            generic_window_secs: 3600,
            ai_call_max: 50,
            ai_call_window_secs: 3600,
            tool_call_max: 30,
            tool_call_window_secs: 3600,
            burst_max: 10,
            burst_window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    /// Create a new RateLimitConfig from environment variables, with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RATE_LIMIT_GENERIC")
            && let Ok(n) = val.parse::<usize>()
        {
            config.generic_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_AI_CALL")
            && let Ok(n) = val.parse::<usize>()
        {
            config.ai_call_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_TOOL_CALL")
            && let Ok(n) = val.parse::<usize>()
        {
            config.tool_call_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_BURST")
            && let Ok(n) = val.parse::<usize>()
        {
            config.burst_max = n;
        }

        config
    }

    /// `(max, window_secs)` for a named bucket, plus the always-on burst
    /// ceiling. A caller checks both the bucket limit and the burst limit
    /// under distinct keys for the same user.
    pub fn bucket(&self, name: RateLimitBucketKind) -> (usize, u64) {
        match name {
            RateLimitBucketKind::Generic => (self.generic_max, self.generic_window_secs),
            RateLimitBucketKind::AiCall => (self.ai_call_max, self.ai_call_window_secs),
            RateLimitBucketKind::ToolCall => (self.tool_call_max, self.tool_call_window_secs),
            RateLimitBucketKind::Burst => (self.burst_max, self.burst_window_secs),
        }
    }
}

/// The four rate-limit classes named in spec.md §3/§4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBucketKind {
    Generic,
    AiCall,
    ToolCall,
    Burst,
}

impl RateLimitBucketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::AiCall => "ai_call",
            Self::ToolCall => "tool_call",
            Self::Burst => "burst",
        }
    }
}

pub struct RateLimiter {
    limits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Information about rate limit status for a given key.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Seconds until the oldest request in the window expires (i.e. a slot opens).
    /// 0 if there's remaining capacity.
    pub retry_after_secs: u64,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            limits: Mutex::new(HashMap::new()),
        }
    }

    /// Check if a request is allowed. Returns true if allowed, false if rate limited.
    /// `key` is typically "action:ip", `max` is max requests, `window_secs` is the time window.
    pub fn check(&self, key: &str, max: usize, window_secs: u64) -> bool {
        self.check_with_info(key, max, window_secs).allowed
    }

    /// Check rate limit and return detailed info for response headers.
    pub fn check_with_info(&self, key: &str, max: usize, window_secs: u64) -> RateLimitInfo {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let window = std::time::Duration::from_secs(window_secs);

        let entries = limits.entry(key.to_string()).or_default();

        // Remove expired entries
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            // Calculate when the oldest entry will expire
            let oldest = match entries.iter().min() {
                Some(t) => t,
                None => return RateLimitInfo { allowed: false, remaining: 0, limit: max, retry_after_secs: 1 },
            };
            let elapsed = now.duration_since(*oldest);
            let retry_after = if elapsed < window {
                (window - elapsed).as_secs() + 1 // +1 to ensure the slot is actually open
            } else {
                1
            };

            return RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                retry_after_secs: retry_after,
            };
        }

        entries.push(now);
        let remaining = max - entries.len();

        RateLimitInfo {
            allowed: true,
            limit: max,
            remaining,
            retry_after_secs: 0,
        }
    }

    /// Checks both the named bucket's hourly ceiling and the always-on
    /// per-minute burst ceiling for `user_id`. Returns the first failing
    /// check's info, or the bucket's info if both pass.
    pub fn check_bucket(
        &self,
        config: &RateLimitConfig,
        user_id: &str,
        bucket: RateLimitBucketKind,
    ) -> RateLimitInfo {
        let (burst_max, burst_window) = config.bucket(RateLimitBucketKind::Burst);
        let burst_key = format!("burst:{user_id}");
        let burst_info = self.check_with_info(&burst_key, burst_max, burst_window);
        if !burst_info.allowed {
            return burst_info;
        }

        let (max, window) = config.bucket(bucket);
        let key = format!("{}:{}", bucket.as_str(), user_id);
        self.check_with_info(&key, max, window)
    }
}
