//! Error-kind taxonomy (spec §7): typed, per-subsystem, no `anyhow`.

use thiserror::Error;

/// Errors raised while verifying or admitting a webhook delivery (C1, C2, C14).
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("unsupported event type: {0}")]
    UnsupportedEvent(String),
    #[error("missing signature header")]
    MissingSignature,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("unknown repository: {0}")]
    UnknownRepository(String),
    #[error("repository disabled: {0}")]
    RepositoryDisabled(String),
    #[error("duplicate delivery: {0}")]
    DuplicateDelivery(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("dispatch queue full")]
    QueueFull,
}

/// Errors surfaced by the Permission Store (C3).
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("permission denied: requires {required}, have {actual}")]
    Denied { required: String, actual: String },
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("superuser list is immutable at runtime")]
    ImmutableSuperuserList,
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Rate limiting errors (spec §4.2, §3 `RateLimitBucket`).
#[derive(Debug, Error)]
#[error("rate limit exceeded for {bucket}, retry after {retry_after_secs}s")]
pub struct RateLimitError {
    pub bucket: String,
    pub retry_after_secs: u64,
}

/// A remote call to a code host or LLM provider failed.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transient failure calling {0}: {1}")]
    Transient(String, String),
    #[error("request rejected by {0}: {1}")]
    Rejected(String, String),
    #[error("timed out calling {0}")]
    Timeout(String),
}

/// Errors from the AI tool-call orchestrator (C9-C12).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid tool parameters for {tool}: {reason}")]
    InvalidParameters { tool: String, reason: String },
    #[error("tool call rejected by sanitizer: {0}")]
    Sanitized(String),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("max tool-call iterations exceeded")]
    MaxIterationsExceeded,
}

/// Errors from the PR Review Controller (C13).
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review already in progress for {0}#{1}")]
    AlreadyInProgress(String, u64),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("could not parse review result: {0}")]
    UnparseableResult(String),
}

/// Errors reading or writing persisted JSON state (config, contexts,
/// permissions).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed json at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level error type a request handler may return.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Ingress(#[from] IngressError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
