//! Notification Pipeline (C5 → C6 → C7, spec.md §4.4): formats an incoming
//! webhook event, fans it out to each configured target's aggregation key.

pub mod aggregator;
pub mod formatter;
pub mod sender;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::models::{NotificationTarget, RepositoryConfig, WebhookEvent};
use aggregator::AggregationEngine;
use sender::ChatAdapter;

pub struct NotificationPipeline<A: ChatAdapter + 'static> {
    engine: Arc<AggregationEngine<A>>,
}

impl<A: ChatAdapter + 'static> NotificationPipeline<A> {
    pub fn new(engine: Arc<AggregationEngine<A>>) -> Self {
        Self { engine }
    }

    /// Formats `event` and enqueues the resulting record to every target
    /// channel the repo config names, keyed by `<platform>_<target_id>`
    /// (spec.md §4.4).
    pub fn handle(&self, event: &WebhookEvent, repo_config: &RepositoryConfig, app_config: &AppConfig) {
        let record = formatter::format_event(
            &event.event_type,
            &event.payload,
            repo_config.review_bot_username.as_deref(),
            &app_config.star_milestones,
        );
        let Some(record) = record else {
            return;
        };

        for target_id in &repo_config.qq_target_ids {
            let target = NotificationTarget {
                platform: "qq".to_string(),
                target_id: target_id.clone(),
            };
            self.engine.add(target.aggregation_key(), target, record.clone());
        }

        if app_config.debug_channel.enabled {
            if let Some(debug_target_id) = &app_config.debug_channel.target_id {
                let target = NotificationTarget {
                    platform: "debug".to_string(),
                    target_id: debug_target_id.clone(),
                };
                self.engine.add(target.aggregation_key(), target, record.clone());
            }
        }
    }
}
