//! Webhook Dispatcher (C14, spec.md §4.3, §6). `Submit` validates, gates,
//! and verifies a delivery synchronously; an accepted event is queued onto
//! a bounded channel a single worker drains, fanning each event out to its
//! parallel handler set. Grounded in the teacher's
//! `webhooks::spawn_dispatcher`/`deliver_webhooks` shape (a spawned loop
//! over a channel, fanning out via one `tokio::spawn` per recipient) —
//! adapted from the teacher's fire-and-forget broadcast subscribers to a
//! single mpsc worker that awaits its fanned-out tasks together, since
//! spec.md §4.3 needs outcomes collected for the error-backoff counter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::{AppConfig, ConfigManager};
use crate::dedup::DedupCache;
use crate::errors::IngressError;
use crate::models::{RepositoryConfig, WebhookEvent};
use crate::notifications::sender::ChatAdapter;
use crate::notifications::NotificationPipeline;
use crate::review::ReviewController;
use crate::signature::verify_signature;
use crate::webhook::automation::CodeHostAutomation;
use crate::webhook::reconciler::CommentReplyReconciler;

const QUEUE_CAPACITY: usize = 1000;
const BACKOFF_STEP_SECS: u64 = 2;
const BACKOFF_CAP_SECS: u64 = 10;
const BACKOFF_RESET_THRESHOLD: u32 = 5;
const BACKOFF_RESET_SLEEP_SECS: u64 = 30;

/// Every `event_type` GitHub may send us (spec.md §6). Anything outside
/// this set is well-formed but unrecognized, and is accepted-and-ignored
/// rather than rejected — distinct from the structurally-invalid input
/// (empty/missing `event_type`) that `Submit` does reject.
const SUPPORTED_EVENT_TYPES: &[&str] = &[
    "push",
    "pull_request",
    "issues",
    "issue_comment",
    "pull_request_review",
    "pull_request_review_comment",
    "release",
    "star",
    "fork",
    "watch",
    "create",
    "delete",
    "workflow_run",
    "workflow_job",
    "repository",
    "ping",
];

struct QueuedEvent {
    event: WebhookEvent,
    repo_config: RepositoryConfig,
}

/// Admits deliveries and owns the queue the single worker drains. Kept
/// separate from the worker's handler set so `Submit` never blocks on
/// handler work.
pub struct WebhookDispatcher {
    sender: mpsc::Sender<QueuedEvent>,
    config: Arc<ConfigManager>,
    dedup: Arc<DedupCache>,
}

impl WebhookDispatcher {
    /// Spawns the worker loop and returns the admission half.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<A: ChatAdapter + 'static>(
        config: Arc<ConfigManager>,
        dedup: Arc<DedupCache>,
        notifications: Arc<NotificationPipeline<A>>,
        automation: Arc<CodeHostAutomation>,
        review: Arc<ReviewController<A>>,
        reconciler: Arc<CommentReplyReconciler>,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(worker_loop(receiver, Arc::clone(&config), notifications, automation, review, reconciler));
        Arc::new(Self { sender, config, dedup })
    }

    /// Admission contract (spec.md §4.3): structurally-invalid input and
    /// true repo/signature/capacity failures reject; everything else either
    /// enqueues (`Ok`) or is silently accepted-but-dropped (`Ok`, no
    /// enqueue) — allow-list mismatches, duplicate deliveries, and
    /// well-formed-but-unrecognized event types (spec.md §6) are all
    /// "accepted" from the caller's point of view.
    pub fn submit(&self, mut event: WebhookEvent) -> Result<(), IngressError> {
        if event.event_type.is_empty() {
            return Err(IngressError::MissingField("event_type".to_string()));
        }
        if event.delivery_id.is_empty() {
            return Err(IngressError::MissingField("delivery_id".to_string()));
        }
        if event.repository.is_none() {
            event.repository = WebhookEvent::derive_repository(&event.payload);
        }
        let Some(repo) = event.repository.clone() else {
            return Err(IngressError::MissingField("repository".to_string()));
        };

        if !SUPPORTED_EVENT_TYPES.contains(&event.event_type.as_str()) {
            tracing::debug!(event_type = %event.event_type, "unrecognized event type accepted and ignored");
            return Ok(());
        }

        let snapshot: AppConfig = self.config.snapshot();
        let Some(repo_config) = snapshot.repo_mappings.get(&repo).cloned() else {
            return Err(IngressError::UnknownRepository(repo));
        };
        if !repo_config.enabled {
            return Err(IngressError::RepositoryDisabled(repo));
        }
        if !repo_config.allowed_event_types.is_empty() && !repo_config.allowed_event_types.contains(&event.event_type) {
            tracing::debug!(%repo, event_type = %event.event_type, "event type outside repo allow-list, dropped");
            return Ok(());
        }

        if repo_config.verify_signature {
            let secret = repo_config.webhook_secret.as_deref().ok_or(IngressError::MissingSignature)?;
            verify_signature(secret, event.signature.as_deref(), &event.raw_body)?;
        }

        if self.dedup.check_and_record(&event.delivery_id) {
            tracing::debug!(delivery_id = %event.delivery_id, "duplicate delivery, treated as accepted");
            return Ok(());
        }

        self.sender.try_send(QueuedEvent { event, repo_config }).map_err(|_| IngressError::QueueFull)
    }
}

async fn worker_loop<A: ChatAdapter + 'static>(
    mut receiver: mpsc::Receiver<QueuedEvent>,
    config: Arc<ConfigManager>,
    notifications: Arc<NotificationPipeline<A>>,
    automation: Arc<CodeHostAutomation>,
    review: Arc<ReviewController<A>>,
    reconciler: Arc<CommentReplyReconciler>,
) {
    let mut consecutive_errors: u32 = 0;

    while let Some(queued) = receiver.recv().await {
        let app_config = config.snapshot();
        let had_error = route_event(&queued.event, &queued.repo_config, &app_config, &notifications, &automation, &review, &reconciler).await;

        if had_error {
            consecutive_errors += 1;
            if consecutive_errors >= BACKOFF_RESET_THRESHOLD {
                tokio::time::sleep(Duration::from_secs(BACKOFF_RESET_SLEEP_SECS)).await;
                consecutive_errors = 0;
            } else {
                let backoff = (BACKOFF_STEP_SECS * consecutive_errors as u64).min(BACKOFF_CAP_SECS);
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
        } else {
            consecutive_errors = 0;
        }
    }
    tracing::info!("webhook dispatcher worker exiting: queue drained after shutdown");
}

/// Fans `event` out to its applicable handlers in parallel, awaits them
/// together, and reports whether any failed (feeds the backoff counter).
async fn route_event<A: ChatAdapter + 'static>(
    event: &WebhookEvent,
    repo_config: &RepositoryConfig,
    app_config: &AppConfig,
    notifications: &Arc<NotificationPipeline<A>>,
    automation: &Arc<CodeHostAutomation>,
    review: &Arc<ReviewController<A>>,
    reconciler: &Arc<CommentReplyReconciler>,
) -> bool {
    notifications.handle(event, repo_config, app_config);

    let mut handles: Vec<tokio::task::JoinHandle<Result<(), String>>> = Vec::new();

    if matches!(event.event_type.as_str(), "issues" | "pull_request") {
        let automation = Arc::clone(automation);
        let event = event.clone();
        let repo = event.repository.clone().unwrap_or_default();
        handles.push(tokio::spawn(async move { automation.handle(&event, &repo).await }));
    }

    if event.event_type == "pull_request" {
        match event.payload.get("action").and_then(|v| v.as_str()) {
            Some("review_requested") => {
                let repo = event.repository.clone().unwrap_or_default();
                review.handle_review_requested(&event.payload, &repo, repo_config);
            }
            Some("review_request_removed") => {
                let repo = event.repository.clone().unwrap_or_default();
                review.handle_review_request_removed(&event.payload, &repo, repo_config);
            }
            _ => {}
        }
    }

    if matches!(event.event_type.as_str(), "issue_comment" | "pull_request_review_comment") {
        let reconciler = Arc::clone(reconciler);
        let event = event.clone();
        let repo_config = repo_config.clone();
        handles.push(tokio::spawn(async move {
            let repo = event.repository.clone().unwrap_or_default();
            reconciler.handle_comment_event(&event, &repo, &repo_config).await
        }));
    }

    let mut had_error = false;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                tracing::warn!(%reason, "webhook handler failed");
                had_error = true;
            }
            Err(join_err) => {
                tracing::warn!(error = %join_err, "webhook handler task panicked");
                had_error = true;
            }
        }
    }
    had_error
}


/// Test-only helper isolating the structural-validity checks `Submit`
/// performs before touching config/dedup/queue state.
#[cfg(test)]
fn reject_reason_for_structural_check(event: &WebhookEvent) -> Option<IngressError> {
    if event.event_type.is_empty() {
        return Some(IngressError::MissingField("event_type".to_string()));
    }
    if event.delivery_id.is_empty() {
        return Some(IngressError::MissingField("delivery_id".to_string()));
    }
    None
}
