//! Aggregation Engine (C6, spec.md §4.4, §4.10). Per-`(platform, target_id)`
//! coalescing window with a single re-armed timer per key, a bounded FIFO
//! backlog, and a process-global mute gate. Grounded in the teacher's
//! periodic-background-task shape (`retention.rs`'s `spawn_retention_task`),
//! adapted from one shared sweep to one timer task per key as spec.md §9
//! requires ("each aggregation group owns one timer task").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::models::{NotificationRecord, NotificationTarget};
use crate::notifications::sender::{ChatAdapter, NotificationSender};

const BACKLOG_CAP: usize = 10;

struct AggregationGroup {
    target: NotificationTarget,
    messages: Vec<NotificationRecord>,
    created_at: Instant,
    last_updated: Instant,
    /// Bumped on every `add`; a timer fires only if the generation it was
    /// armed for still matches, so a re-arm implicitly cancels the stale
    /// timer's effect without needing a cancellation handle.
    generation: u64,
}

struct MuteState {
    muted_until: Mutex<Option<Instant>>,
}

impl MuteState {
    fn is_muted(&self) -> bool {
        match *self.muted_until.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(deadline) => Instant::now() < deadline,
            None => false,
        }
    }
}

pub struct AggregationEngine<A: ChatAdapter> {
    groups: Mutex<HashMap<String, AggregationGroup>>,
    mute: MuteState,
    sender: Arc<NotificationSender<A>>,
    delay: Duration,
    generation_counter: AtomicU64,
}

impl<A: ChatAdapter + 'static> AggregationEngine<A> {
    pub fn new(sender: Arc<NotificationSender<A>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            groups: Mutex::new(HashMap::new()),
            mute: MuteState { muted_until: Mutex::new(None) },
            sender,
            delay,
            generation_counter: AtomicU64::new(0),
        })
    }

    pub fn mute_for(&self, duration: Duration) {
        *self.mute.muted_until.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now() + duration);
    }

    pub fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }

    /// `add(k, m)` from spec.md §4.10: drop if muted; else append (evicting
    /// the oldest on overflow), re-arm the key's single timer.
    pub fn add(self: &Arc<Self>, key: String, target: NotificationTarget, record: NotificationRecord) {
        if self.mute.is_muted() {
            tracing::debug!(%key, "aggregation add dropped: muted");
            return;
        }

        let generation = self.generation_counter.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let entry = groups.entry(key.clone()).or_insert_with(|| AggregationGroup {
                target: target.clone(),
                messages: Vec::new(),
                created_at: now,
                last_updated: now,
                generation,
            });
            entry.messages.push(record);
            if entry.messages.len() > BACKLOG_CAP {
                entry.messages.remove(0);
            }
            entry.last_updated = now;
            entry.generation = generation;
        }

        let engine = Arc::clone(self);
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.on_timer(&key, generation).await;
        });
    }

    /// `onTimer(k)` from spec.md §4.10: snapshot-then-remove under the
    /// table lock, then send outside the lock. A stale timer (superseded
    /// by a later `add`) is a no-op.
    async fn on_timer(&self, key: &str, generation: u64) {
        let drained = {
            let mut groups = self.groups.lock().unwrap_or_else(|e| e.into_inner());
            match groups.get(key) {
                Some(entry) if entry.generation == generation => groups.remove(key),
                _ => None,
            }
        };

        let Some(group) = drained else {
            return;
        };
        if group.messages.is_empty() {
            return;
        }
        if self.mute.is_muted() {
            tracing::debug!(%key, "aggregation drain dropped: muted");
            return;
        }

        self.sender.send_group(&group.target, &group.messages).await;
    }

    pub fn group_count(&self) -> usize {
        self.groups.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    fn group_age(&self, key: &str) -> Option<(Instant, Instant)> {
        self.groups
            .lock()
            .unwrap()
            .get(key)
            .map(|g| (g.created_at, g.last_updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeAdapter {
        sends: StdMutex<Vec<usize>>,
    }

    #[async_trait]
    impl ChatAdapter for FakeAdapter {
        async fn send(&self, _target: &NotificationTarget, text: &str) -> Result<String, String> {
            self.sends.lock().unwrap().push(text.len());
            Ok("m1".to_string())
        }
        async fn recall(&self, _target: &NotificationTarget, _message_id: &str) -> Result<(), String> {
            Ok(())
        }
    }

    fn record(title: &str) -> NotificationRecord {
        NotificationRecord {
            title: title.to_string(),
            body: String::new(),
            url: None,
            image_url: None,
            mentions: Vec::new(),
            priority: 5,
            metadata: serde_json::json!({}),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn burst_of_messages_drains_to_one_send() {
        let adapter = FakeAdapter { sends: StdMutex::new(Vec::new()) };
        let sender = Arc::new(NotificationSender::new(adapter));
        let engine = AggregationEngine::new(sender.clone(), Duration::from_millis(20));
        let target = NotificationTarget { platform: "qq".to_string(), target_id: "1".to_string() };

        for i in 0..5 {
            engine.add("qq_1".to_string(), target.clone(), record(&format!("m{i}")));
        }
        assert_eq!(engine.group_count(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(engine.group_count(), 0);
        assert_eq!(sender.adapter.sends.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mute_suppresses_enqueue_and_drain() {
        let adapter = FakeAdapter { sends: StdMutex::new(Vec::new()) };
        let sender = Arc::new(NotificationSender::new(adapter));
        let engine = AggregationEngine::new(sender.clone(), Duration::from_millis(10));
        engine.mute_for(Duration::from_secs(60));
        let target = NotificationTarget { platform: "qq".to_string(), target_id: "1".to_string() };

        engine.add("qq_1".to_string(), target, record("m"));
        assert_eq!(engine.group_count(), 0);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(sender.adapter.sends.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn overflow_evicts_oldest() {
        let adapter = FakeAdapter { sends: StdMutex::new(Vec::new()) };
        let sender = Arc::new(NotificationSender::new(adapter));
        let engine = AggregationEngine::new(sender, Duration::from_millis(200));
        let target = NotificationTarget { platform: "qq".to_string(), target_id: "1".to_string() };
        for i in 0..15 {
            engine.add("qq_1".to_string(), target.clone(), record(&format!("m{i}")));
        }
        let groups = engine.groups.lock().unwrap();
        let group = groups.get("qq_1").unwrap();
        assert_eq!(group.messages.len(), BACKLOG_CAP);
        assert_eq!(group.messages[0].title, "m5");
    }
}
