//! Core rate limiter implementation.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::event::{EventBus, EventHandler, SayEvent, SubscriptionId, SAY_EVENT};
use crate::store::{KeyValueStore, KeyValueStoreExt};
use crate::tasks::BackgroundTasks;

use super::key::HistoryKey;
use super::rules::RateLimitConfig;
use super::window::{Decision, SlidingWindow, TimestampRecord};

/// Priority the limiter subscribes at. Below the default, so it sees say
/// events before ordinary handlers and can abort them.
pub const DEFAULT_PRIORITY_OFFSET: i32 = -100;

/// What the limiter did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Limiting is off, or the source owns the target.
    Bypassed,
    /// The message fit in the window and was recorded.
    Admitted,
    /// The event was aborted. `notified` is true when this rejection sent
    /// the blocked message.
    Rejected { notified: bool },
}

/// Sliding window limiter for say events, scoped to one target.
///
/// History lives in the key-value store and is re-read for every event.
/// Whether a source has already been told it is blocked is tracked in memory
/// only, so a restart may repeat one notification.
pub struct RateLimiter {
    config: RateLimitConfig,
    /// `None` when the config disables limiting
    window: Option<SlidingWindow>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    /// Per-source "blocked message already sent" flags
    notified: DashMap<String, bool>,
    tasks: BackgroundTasks,
}

impl RateLimiter {
    /// Create a limiter reading the system clock.
    pub fn new(config: RateLimitConfig, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: RateLimitConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let window = config.window();
        debug!(
            max_messages = %config.max_messages,
            window_millis = %config.window_millis,
            enabled = window.is_some(),
            "Creating rate limiter"
        );

        Self {
            config,
            window,
            store,
            clock,
            notified: DashMap::new(),
            tasks: BackgroundTasks::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Subscribe this limiter to say events on `bus`.
    pub fn install(self: &Arc<Self>, bus: &EventBus) -> SubscriptionId {
        bus.subscribe(SAY_EVENT, self.clone(), DEFAULT_PRIORITY_OFFSET)
    }

    /// Check a say event against the source's window.
    ///
    /// Admitted events are left untouched and recorded in the background.
    /// Rejected events are aborted before anything else happens, and the
    /// first rejection of a streak sends the blocked message back through
    /// the target. Storage and send failures are logged, never returned.
    pub async fn on_say(&self, event: &SayEvent) -> Verdict {
        let Some(window) = self.window else {
            return Verdict::Bypassed;
        };

        if event.is_from_owner() {
            trace!(source = %event.source.id, "Owner is exempt from rate limiting");
            return Verdict::Bypassed;
        }

        let key = HistoryKey::for_source(&event.source.id);
        let history = self.load_history(&key).await;
        let now = self.clock.now_millis();

        trace!(key = %key, stored = history.len(), now = now, "Checking rate limit");

        match window.decide(history, now) {
            Decision::Admit { history } => {
                debug!(source = %event.source.id, active = history.len(), "Message admitted");
                self.persist_history(key, history);
                if let Some(mut sent) = self.notified.get_mut(&event.source.id) {
                    *sent = false;
                }
                Verdict::Admitted
            }
            Decision::Reject { active } => {
                event.abort();

                let first_in_streak = {
                    let mut sent = self.notified.entry(event.source.id.clone()).or_insert(false);
                    !std::mem::replace(&mut *sent, true)
                };

                debug!(
                    source = %event.source.id,
                    active = active,
                    limit = window.max_messages(),
                    notify = first_in_streak,
                    "Rate limit exceeded"
                );

                if first_in_streak {
                    self.send_blocked_message(event);
                }
                Verdict::Rejected {
                    notified: first_in_streak,
                }
            }
        }
    }

    /// Stored history for `key`. Missing, unreadable or malformed history
    /// all count as empty.
    async fn load_history(&self, key: &HistoryKey) -> Vec<TimestampRecord> {
        let stored: Result<Option<Vec<TimestampRecord>>, _> = self.store.get_json(key.as_str()).await;
        match stored {
            Ok(history) => history.unwrap_or_default(),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read message history, treating as empty");
                Vec::new()
            }
        }
    }

    fn persist_history(&self, key: HistoryKey, history: Vec<TimestampRecord>) {
        let store = self.store.clone();
        self.tasks.spawn("persist_history", async move {
            store
                .set_json(key.as_str(), &history)
                .await
                .map_err(|e| format!("failed to store history for {}: {}", key.source_id(), e))
        });
    }

    fn send_blocked_message(&self, event: &SayEvent) {
        let target = event.target.clone();
        let message = self.config.blocked_message().to_string();
        let source = event.source.id.clone();
        self.tasks.spawn("notify_source", async move {
            target
                .say(&message)
                .await
                .map_err(|e| format!("failed to send rate limit message to {}: {}", source, e))
        });
    }

    /// Whether the current over-limit streak of `source_id` has already been
    /// notified.
    pub fn notification_sent(&self, source_id: &str) -> bool {
        self.notified.get(source_id).map(|sent| *sent).unwrap_or(false)
    }

    /// Number of sources with notification state.
    pub fn tracked_sources(&self) -> usize {
        self.notified.len()
    }

    /// Number of history writes and notifications still in flight.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.pending()
    }

    /// Wait for all in-flight history writes and notifications.
    pub async fn flush(&self) {
        self.tasks.flush().await;
    }
}

#[async_trait]
impl EventHandler for RateLimiter {
    async fn handle(&self, event: &SayEvent) {
        self.on_say(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, RecordingAgent, SourceAgent, TargetAgent};
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, StoreError};
    use serde_json::{json, Value};

    struct Harness {
        limiter: RateLimiter,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        target: Arc<RecordingAgent>,
    }

    impl Harness {
        fn new(config: RateLimitConfig) -> Self {
            let store = Arc::new(MemoryStore::new());
            let clock = Arc::new(ManualClock::new(0));
            let limiter = RateLimiter::with_clock(config, store.clone(), clock.clone());
            Self {
                limiter,
                store,
                clock,
                target: Arc::new(RecordingAgent::new("bot", "owner")),
            }
        }

        async fn say_at(&self, now: i64, source: &str) -> (Verdict, SayEvent) {
            self.clock.set(now);
            let event = SayEvent::new(SourceAgent::new(source), self.target.clone(), "hello");
            let verdict = self.limiter.on_say(&event).await;
            self.limiter.flush().await;
            (verdict, event)
        }

        async fn stored(&self, source: &str) -> Option<Vec<i64>> {
            let key = HistoryKey::for_source(source);
            let history: Option<Vec<TimestampRecord>> =
                self.store.get_json(key.as_str()).await.unwrap();
            history.map(|h| h.iter().map(|r| r.timestamp).collect())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            Err(StoreError::Backend("read refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: Value) -> Result<(), StoreError> {
            Err(StoreError::Backend("write refused".to_string()))
        }
    }

    /// Reads work, writes always fail.
    #[derive(Default)]
    struct ReadOnlyStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, _key: &str, _value: Value) -> Result<(), StoreError> {
            Err(StoreError::Backend("write refused".to_string()))
        }
    }

    /// Yields a few times before each write lands.
    #[derive(Default)]
    struct SlowStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl KeyValueStore for SlowStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
            for _ in 0..5 {
                tokio::task::yield_now().await;
            }
            self.inner.set(key, value).await
        }
    }

    struct MuteAgent;

    #[async_trait]
    impl TargetAgent for MuteAgent {
        fn id(&self) -> &str {
            "mute"
        }

        fn owner_id(&self) -> &str {
            "owner"
        }

        async fn say(&self, _message: &str) -> Result<(), AgentError> {
            Err(AgentError::SendFailed("muted".to_string()))
        }
    }

    #[tokio::test]
    async fn test_admits_under_limit_and_records() {
        let h = Harness::new(RateLimitConfig::new(2, 1000));

        let (verdict, event) = h.say_at(0, "alice").await;
        assert_eq!(verdict, Verdict::Admitted);
        assert!(!event.is_aborted());

        h.say_at(100, "alice").await;
        assert_eq!(h.stored("alice").await, Some(vec![0, 100]));
    }

    #[tokio::test]
    async fn test_window_scenario() {
        let h = Harness::new(RateLimitConfig::new(2, 1000).with_blocked_message("wait"));

        assert_eq!(h.say_at(0, "S").await.0, Verdict::Admitted);
        assert_eq!(h.say_at(100, "S").await.0, Verdict::Admitted);

        let (verdict, event) = h.say_at(200, "S").await;
        assert_eq!(verdict, Verdict::Rejected { notified: true });
        assert!(event.is_aborted());
        assert_eq!(h.target.said(), vec!["wait"]);
        assert_eq!(h.stored("S").await, Some(vec![0, 100]));
        assert!(h.limiter.notification_sent("S"));

        let (verdict, event) = h.say_at(1101, "S").await;
        assert_eq!(verdict, Verdict::Admitted);
        assert!(!event.is_aborted());
        assert_eq!(h.stored("S").await, Some(vec![1101]));
        assert!(!h.limiter.notification_sent("S"));
    }

    #[tokio::test]
    async fn test_one_notification_per_streak() {
        let h = Harness::new(RateLimitConfig::new(1, 1000));

        h.say_at(0, "alice").await;
        for t in 1..=5 {
            let (verdict, event) = h.say_at(t, "alice").await;
            assert!(event.is_aborted());
            assert_eq!(verdict, Verdict::Rejected { notified: t == 1 });
        }
        assert_eq!(h.target.said().len(), 1);

        // One admission ends the streak
        h.say_at(1000, "alice").await;
        let (verdict, _) = h.say_at(1001, "alice").await;
        assert_eq!(verdict, Verdict::Rejected { notified: true });
        assert_eq!(h.target.said().len(), 2);
    }

    #[tokio::test]
    async fn test_boundary_record_expired() {
        let h = Harness::new(RateLimitConfig::new(1, 1000));

        h.say_at(0, "alice").await;
        assert!(h.say_at(999, "alice").await.1.is_aborted());
        assert_eq!(h.say_at(1000, "alice").await.0, Verdict::Admitted);
    }

    #[tokio::test]
    async fn test_owner_is_exempt() {
        let h = Harness::new(RateLimitConfig::new(1, 1000));

        for t in 0..5 {
            let (verdict, event) = h.say_at(t, "owner").await;
            assert_eq!(verdict, Verdict::Bypassed);
            assert!(!event.is_aborted());
        }
        assert_eq!(h.stored("owner").await, None);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_config_admits_everything() {
        for config in [
            RateLimitConfig::new(0, 1000),
            RateLimitConfig::new(1, 0),
            RateLimitConfig::from_yaml("max_messages: 1\nwindow_millis: .inf").unwrap(),
        ] {
            let h = Harness::new(config);
            for t in 0..5 {
                let (verdict, event) = h.say_at(t, "alice").await;
                assert_eq!(verdict, Verdict::Bypassed);
                assert!(!event.is_aborted());
            }
            assert!(h.store.is_empty());
            assert_eq!(h.limiter.tracked_sources(), 0);
        }
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        let h = Harness::new(RateLimitConfig::new(1, 1000));

        assert_eq!(h.say_at(0, "alice").await.0, Verdict::Admitted);
        assert_eq!(h.say_at(1, "bob").await.0, Verdict::Admitted);
        assert!(h.say_at(2, "alice").await.1.is_aborted());
        assert!(h.limiter.notification_sent("alice"));
        assert!(!h.limiter.notification_sent("bob"));
    }

    #[tokio::test]
    async fn test_malformed_history_treated_as_empty() {
        let h = Harness::new(RateLimitConfig::new(1, 1000));
        h.store
            .set("userMessageTimestamps.alice", json!({ "not": "a list" }))
            .await
            .unwrap();

        assert_eq!(h.say_at(0, "alice").await.0, Verdict::Admitted);
        assert_eq!(h.stored("alice").await, Some(vec![0]));
    }

    #[tokio::test]
    async fn test_storage_failures_fail_open() {
        let limiter = RateLimiter::with_clock(
            RateLimitConfig::new(1, 1000),
            Arc::new(FailingStore),
            Arc::new(ManualClock::new(0)),
        );
        let target = Arc::new(RecordingAgent::new("bot", "owner"));

        for _ in 0..3 {
            let event = SayEvent::new(SourceAgent::new("alice"), target.clone(), "hi");
            assert_eq!(limiter.on_say(&event).await, Verdict::Admitted);
            assert!(!event.is_aborted());
        }
        limiter.flush().await;
        assert_eq!(limiter.pending_tasks(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_still_aborts() {
        let store = Arc::new(MemoryStore::new());
        let limiter = RateLimiter::with_clock(
            RateLimitConfig::new(1, 1000),
            store,
            Arc::new(ManualClock::new(0)),
        );
        let target: Arc<dyn TargetAgent> = Arc::new(MuteAgent);

        let first = SayEvent::new(SourceAgent::new("alice"), target.clone(), "hi");
        limiter.on_say(&first).await;
        limiter.flush().await;

        let second = SayEvent::new(SourceAgent::new("alice"), target, "hi");
        let verdict = limiter.on_say(&second).await;
        limiter.flush().await;

        assert_eq!(verdict, Verdict::Rejected { notified: true });
        assert!(second.is_aborted());
        assert!(limiter.notification_sent("alice"));
    }

    #[tokio::test]
    async fn test_install_subscribes_at_offset() {
        let bus = EventBus::new();
        let limiter = Arc::new(RateLimiter::new(
            RateLimitConfig::default(),
            Arc::new(MemoryStore::new()),
        ));

        limiter.install(&bus);
        assert_eq!(bus.handler_count(SAY_EVENT), 1);
    }

    #[tokio::test]
    async fn test_lost_write_undercounts_next_decision() {
        let limiter = RateLimiter::with_clock(
            RateLimitConfig::new(1, 1000),
            Arc::new(ReadOnlyStore::default()),
            Arc::new(ManualClock::new(0)),
        );
        let target = Arc::new(RecordingAgent::new("bot", "owner"));

        for _ in 0..2 {
            let event = SayEvent::new(SourceAgent::new("alice"), target.clone(), "hi");
            assert_eq!(limiter.on_say(&event).await, Verdict::Admitted);
            limiter.flush().await;
        }
        assert!(target.said().is_empty());
    }

    #[tokio::test]
    async fn test_write_completes_after_limiter_dropped() {
        let store = Arc::new(SlowStore::default());
        let limiter = RateLimiter::with_clock(
            RateLimitConfig::new(1, 1000),
            store.clone(),
            Arc::new(ManualClock::new(0)),
        );
        let target = Arc::new(RecordingAgent::new("bot", "owner"));

        let event = SayEvent::new(SourceAgent::new("alice"), target, "hi");
        assert_eq!(limiter.on_say(&event).await, Verdict::Admitted);
        drop(limiter);

        let key = HistoryKey::for_source("alice");
        for _ in 0..50 {
            if store.inner.get(key.as_str()).await.unwrap().is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(
            store.inner.get(key.as_str()).await.unwrap(),
            Some(json!([{ "timestamp": 0 }]))
        );
    }

    #[tokio::test]
    async fn test_concurrent_flushes_wait_for_write() {
        let store = Arc::new(SlowStore::default());
        let limiter = RateLimiter::with_clock(
            RateLimitConfig::new(1, 1000),
            store.clone(),
            Arc::new(ManualClock::new(0)),
        );
        let target = Arc::new(RecordingAgent::new("bot", "owner"));

        let event = SayEvent::new(SourceAgent::new("alice"), target, "hi");
        limiter.on_say(&event).await;

        let key = HistoryKey::for_source("alice");
        let (limiter, store, key) = (&limiter, &store, &key);
        let after_flush = move || async move {
            limiter.flush().await;
            store.inner.get(key.as_str()).await.unwrap().is_some()
        };
        assert_eq!(tokio::join!(after_flush(), after_flush()), (true, true));
        assert_eq!(limiter.pending_tasks(), 0);
    }
}
