//! In-process pub/sub event bus (§4.3) with per-subscriber isolation: a slow
//! or panicking handler never blocks the emitter or another subscriber.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// The closed set of event kinds, used to filter subscriptions without
/// requiring a handler to match on payload variants it doesn't care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A node began evaluation (suppressed for `event_loop` nodes; see §4.6.5).
    NodeStarted,
    /// A node finished evaluation.
    NodeCompleted,
    /// A node is being retried after a failed attempt.
    NodeRetry,
    /// An edge was traversed from one node to the next.
    EdgeTraversed,
    /// An execution suspended (e.g. awaiting human input).
    ExecutionPaused,
    /// A previously paused execution resumed.
    ExecutionResumed,
    /// A run began.
    RunStarted,
    /// A run reached a terminal state.
    RunCompleted,
    /// A non-fatal problem worth surfacing to observers.
    ProblemReported,
}

/// The type-specific payload of an [`Event`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A node began evaluation.
    NodeStarted {
        /// The node id.
        node_id: String,
    },
    /// A node finished evaluation.
    NodeCompleted {
        /// The node id.
        node_id: String,
        /// Whether the node's own logic considered this a success.
        success: bool,
        /// Wall-clock latency of the (final) attempt.
        latency_ms: u64,
    },
    /// A node is being retried.
    NodeRetry {
        /// The node id.
        node_id: String,
        /// 1-based attempt number about to run.
        attempt: u32,
    },
    /// An edge was traversed.
    EdgeTraversed {
        /// The edge id.
        edge_id: String,
        /// Source node id.
        source: String,
        /// Target node id.
        target: String,
    },
    /// An execution suspended.
    ExecutionPaused {
        /// Human-readable reason.
        reason: String,
    },
    /// A previously paused execution resumed.
    ExecutionResumed,
    /// A run began.
    RunStarted {
        /// The graph id being executed.
        graph_id: String,
    },
    /// A run reached a terminal state.
    RunCompleted {
        /// Whether the run completed successfully.
        success: bool,
    },
    /// A non-fatal problem worth surfacing.
    ProblemReported {
        /// Human-readable message.
        message: String,
    },
}

impl EventPayload {
    /// This payload's [`EventKind`], for subscription filtering.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::NodeStarted { .. } => EventKind::NodeStarted,
            EventPayload::NodeCompleted { .. } => EventKind::NodeCompleted,
            EventPayload::NodeRetry { .. } => EventKind::NodeRetry,
            EventPayload::EdgeTraversed { .. } => EventKind::EdgeTraversed,
            EventPayload::ExecutionPaused { .. } => EventKind::ExecutionPaused,
            EventPayload::ExecutionResumed => EventKind::ExecutionResumed,
            EventPayload::RunStarted { .. } => EventKind::RunStarted,
            EventPayload::RunCompleted { .. } => EventKind::RunCompleted,
            EventPayload::ProblemReported { .. } => EventKind::ProblemReported,
        }
    }
}

/// A single event: common envelope fields plus a type-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// RFC 3339 emission timestamp.
    pub timestamp: String,
    /// The stream (entry point) this event belongs to.
    pub stream_id: String,
    /// The execution instance this event belongs to.
    pub execution_id: String,
    /// The payload.
    pub payload: EventPayload,
}

impl Event {
    fn new(stream_id: impl Into<String>, execution_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            stream_id: stream_id.into(),
            execution_id: execution_id.into(),
            payload,
        }
    }
}

/// An observer of the event bus. Implementations must not panic; any panic
/// that escapes is caught, logged, and counted rather than propagated.
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handle one event. Called on a dedicated task; slow handlers only
    /// delay their own delivery, never the emitter or other subscribers.
    fn handle(&self, event: &Event);
}

struct Subscription {
    id: Uuid,
    event_types: HashSet<EventKind>,
    filter_stream: Option<String>,
    handler: Arc<dyn EventHandler>,
}

impl Subscription {
    fn matches(&self, event: &Event) -> bool {
        let kind_matches = self.event_types.is_empty() || self.event_types.contains(&event.payload.kind());
        let stream_matches = self
            .filter_stream
            .as_deref()
            .map_or(true, |s| s == event.stream_id);
        kind_matches && stream_matches
    }
}

/// Counters surfaced for observability.
#[derive(Debug, Default)]
pub struct EventBusStats {
    /// Handler invocations that panicked.
    pub failed_handlers: AtomicU64,
    /// Events emitted with no matching subscriber.
    pub unmatched_events: AtomicU64,
}

struct Inner {
    subscribers: RwLock<Vec<Subscription>>,
    history: RwLock<VecDeque<Event>>,
    max_history: usize,
    stats: EventBusStats,
}

/// In-process pub/sub bus. Cheaply cloneable; all clones share state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.inner.subscribers.read().len())
            .field("max_history", &self.inner.max_history)
            .finish()
    }
}

impl EventBus {
    /// Build a bus retaining the last `max_history` events for late subscribers.
    pub fn new(max_history: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(Vec::new()),
                history: RwLock::new(VecDeque::with_capacity(max_history)),
                max_history,
                stats: EventBusStats::default(),
            }),
        }
    }

    /// Register `handler` for `event_types` (empty = all kinds), optionally
    /// restricted to one `stream_id`. Returns a subscription id usable with
    /// [`Self::unsubscribe`].
    pub fn subscribe(
        &self,
        event_types: impl IntoIterator<Item = EventKind>,
        filter_stream: Option<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.subscribers.write().push(Subscription {
            id,
            event_types: event_types.into_iter().collect(),
            filter_stream,
            handler,
        });
        id
    }

    /// Remove a subscription. Returns whether one was found.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let mut subs = self.inner.subscribers.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// The last up-to-`max_history` events, oldest first.
    pub fn history(&self) -> Vec<Event> {
        self.inner.history.read().iter().cloned().collect()
    }

    /// Snapshot of the failed-handler / unmatched-event counters.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.inner.stats.failed_handlers.load(Ordering::Relaxed),
            self.inner.stats.unmatched_events.load(Ordering::Relaxed),
        )
    }

    fn dispatch(&self, event: Event) {
        {
            let mut history = self.inner.history.write();
            if history.len() == self.inner.max_history {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let matching: Vec<Arc<dyn EventHandler>> = self
            .inner
            .subscribers
            .read()
            .iter()
            .filter(|s| s.matches(&event))
            .map(|s| s.handler.clone())
            .collect();

        if matching.is_empty() {
            self.inner.stats.unmatched_events.fetch_add(1, Ordering::Relaxed);
            return;
        }

        for handler in matching {
            let event = event.clone();
            let stats_failed = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&event)));
                if let Err(payload) = outcome {
                    stats_failed.stats.failed_handlers.fetch_add(1, Ordering::Relaxed);
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    tracing::warn!(error = %message, "event handler panicked");
                }
            });
        }
    }

    /// Emit a `node_started` event.
    pub fn emit_node_started(&self, stream_id: &str, execution_id: &str, node_id: &str) {
        self.dispatch(Event::new(
            stream_id,
            execution_id,
            EventPayload::NodeStarted {
                node_id: node_id.to_string(),
            },
        ));
    }

    /// Emit a `node_completed` event.
    pub fn emit_node_completed(&self, stream_id: &str, execution_id: &str, node_id: &str, success: bool, latency_ms: u64) {
        self.dispatch(Event::new(
            stream_id,
            execution_id,
            EventPayload::NodeCompleted {
                node_id: node_id.to_string(),
                success,
                latency_ms,
            },
        ));
    }

    /// Emit a `node_retry` event.
    pub fn emit_node_retry(&self, stream_id: &str, execution_id: &str, node_id: &str, attempt: u32) {
        self.dispatch(Event::new(
            stream_id,
            execution_id,
            EventPayload::NodeRetry {
                node_id: node_id.to_string(),
                attempt,
            },
        ));
    }

    /// Emit an `edge_traversed` event.
    pub fn emit_edge_traversed(&self, stream_id: &str, execution_id: &str, edge_id: &str, source: &str, target: &str) {
        self.dispatch(Event::new(
            stream_id,
            execution_id,
            EventPayload::EdgeTraversed {
                edge_id: edge_id.to_string(),
                source: source.to_string(),
                target: target.to_string(),
            },
        ));
    }

    /// Emit an `execution_paused` event.
    pub fn emit_execution_paused(&self, stream_id: &str, execution_id: &str, reason: &str) {
        self.dispatch(Event::new(
            stream_id,
            execution_id,
            EventPayload::ExecutionPaused {
                reason: reason.to_string(),
            },
        ));
    }

    /// Emit an `execution_resumed` event.
    pub fn emit_execution_resumed(&self, stream_id: &str, execution_id: &str) {
        self.dispatch(Event::new(stream_id, execution_id, EventPayload::ExecutionResumed));
    }

    /// Emit a `run_started` event.
    pub fn emit_run_started(&self, stream_id: &str, execution_id: &str, graph_id: &str) {
        self.dispatch(Event::new(
            stream_id,
            execution_id,
            EventPayload::RunStarted {
                graph_id: graph_id.to_string(),
            },
        ));
    }

    /// Emit a `run_completed` event.
    pub fn emit_run_completed(&self, stream_id: &str, execution_id: &str, success: bool) {
        self.dispatch(Event::new(
            stream_id,
            execution_id,
            EventPayload::RunCompleted { success },
        ));
    }

    /// Emit a `problem_reported` event.
    pub fn emit_problem_reported(&self, stream_id: &str, execution_id: &str, message: &str) {
        self.dispatch(Event::new(
            stream_id,
            execution_id,
            EventPayload::ProblemReported {
                message: message.to_string(),
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct RecordingHandler(Mutex<Vec<Event>>);

    impl EventHandler for RecordingHandler {
        fn handle(&self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[derive(Debug)]
    struct PanickingHandler;

    impl EventHandler for PanickingHandler {
        fn handle(&self, _event: &Event) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn subscriber_receives_matching_events_only() {
        let bus = EventBus::new(100);
        let recorder = Arc::new(RecordingHandler(Mutex::new(Vec::new())));
        bus.subscribe([EventKind::NodeStarted], None, recorder.clone());

        bus.emit_node_started("s1", "e1", "n1");
        bus.emit_node_completed("s1", "e1", "n1", true, 5);
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let received = recorder.0.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0].payload, EventPayload::NodeStarted { .. }));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(100);
        let recorder = Arc::new(RecordingHandler(Mutex::new(Vec::new())));
        let id = bus.subscribe([], None, recorder.clone());
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        bus.emit_run_started("s1", "e1", "g1");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_handler_is_isolated_and_counted() {
        let bus = EventBus::new(100);
        bus.subscribe([], None, Arc::new(PanickingHandler));
        let recorder = Arc::new(RecordingHandler(Mutex::new(Vec::new())));
        bus.subscribe([], None, recorder.clone());

        bus.emit_run_started("s1", "e1", "g1");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(recorder.0.lock().unwrap().len(), 1);
        let (failed, _) = bus.stats();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn history_retains_last_max_history_events() {
        let bus = EventBus::new(2);
        bus.emit_run_started("s1", "e1", "g1");
        bus.emit_run_started("s1", "e2", "g1");
        bus.emit_run_started("s1", "e3", "g1");

        let history = bus.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].execution_id, "e2");
        assert_eq!(history[1].execution_id, "e3");
    }

    #[tokio::test]
    async fn stream_filter_restricts_delivery() {
        let bus = EventBus::new(100);
        let recorder = Arc::new(RecordingHandler(Mutex::new(Vec::new())));
        bus.subscribe([], Some("s1".to_string()), recorder.clone());

        bus.emit_run_started("s2", "e1", "g1");
        bus.emit_run_started("s1", "e2", "g1");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let received = recorder.0.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].stream_id, "s1");
    }
}
