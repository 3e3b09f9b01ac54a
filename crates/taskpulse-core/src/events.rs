//! Task change events, envelope schema, and the topic-based event bus.
//!
//! Every committed mutation produces a [`TaskEvent`] that is wrapped in an
//! [`EventEnvelope`] and published on the owner's topic (see [`owner_topic`]).
//! Live sessions subscribe to exactly one topic. Delivery is fire-and-forget:
//! a lagging subscriber misses events and nothing is replayed.
//!
//! Envelopes published locally are also mirrored on a process-wide feed so a
//! relay can forward them to other processes. Envelopes arriving from a relay
//! carry a foreign `origin` and are delivered with [`EventBus::deliver_remote`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::Task;

// ============================================================================
// Events
// ============================================================================

/// What happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    Created,
    Updated,
    Deleted,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

/// A change notification. For `Deleted` the task is the pre-delete snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub action: TaskAction,
    pub task: Task,
}

impl TaskEvent {
    pub fn new(action: TaskAction, task: Task) -> Self {
        Self { action, task }
    }
}

/// Topic carrying the events of one owner's tasks.
pub fn owner_topic(owner_id: Uuid) -> String {
    format!("tasks:{}", owner_id)
}

// ============================================================================
// Envelope
// ============================================================================

/// Routing metadata around a [`TaskEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// UUIDv7 event identifier
    pub event_id: Uuid,
    /// Topic the event was published on
    pub topic: String,
    /// Node id of the publishing process
    pub origin: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub payload: TaskEvent,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    message: &'a TaskEvent,
}

impl EventEnvelope {
    pub fn new(topic: impl Into<String>, origin: Uuid, payload: TaskEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            topic: topic.into(),
            origin,
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Client-facing JSON: `{"message": {"action": ..., "task": {...}}}`.
    pub fn wire_message(&self) -> serde_json::Result<String> {
        serde_json::to_string(&WireMessage {
            message: &self.payload,
        })
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// A live subscription to one topic. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<EventEnvelope>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next envelope.
    ///
    /// Returns `None` once the topic is closed. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        subsystem = "events",
                        topic = %self.topic,
                        skipped,
                        "Subscriber lagged, events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive, used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Topic-keyed broadcast hub.
///
/// One `broadcast` channel per topic, created on first subscribe and pruned
/// once its last subscriber is gone.
pub struct EventBus {
    node_id: Uuid,
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<EventEnvelope>>>,
    local_feed: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given per-topic buffer capacity.
    ///
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (local_feed, _) = broadcast::channel(capacity);
        Self {
            node_id: Uuid::now_v7(),
            capacity,
            topics: RwLock::new(HashMap::new()),
            local_feed,
        }
    }

    /// Identifier stamped on every envelope published by this process.
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Publish an event on `topic`. Never blocks and never fails.
    ///
    /// Returns the number of local subscribers the envelope reached.
    pub fn publish(&self, topic: &str, event: TaskEvent) -> usize {
        let envelope = EventEnvelope::new(topic, self.node_id, event);
        // Relay feed first so remote nodes see events even with no local listeners.
        let _ = self.local_feed.send(envelope.clone());
        self.deliver(envelope)
    }

    /// Deliver an envelope received from another process.
    ///
    /// Envelopes stamped with this node's id are echoes and are ignored.
    pub fn deliver_remote(&self, envelope: EventEnvelope) -> usize {
        if envelope.origin == self.node_id {
            return 0;
        }
        self.deliver(envelope)
    }

    fn deliver(&self, envelope: EventEnvelope) -> usize {
        let topic = envelope.topic.clone();
        let sender = {
            let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
            topics.get(&topic).cloned()
        };

        let delivered = match sender {
            Some(tx) => tx.send(envelope.clone()).unwrap_or(0),
            None => 0,
        };

        tracing::debug!(
            subsystem = "events",
            component = "bus",
            topic = %topic,
            action = envelope.payload.action.as_str(),
            event_id = %envelope.event_id,
            delivered,
            "EventBus publish"
        );

        if delivered == 0 {
            self.prune(&topic);
        }
        delivered
    }

    /// Subscribe to `topic`. Each subscriber gets its own independent stream.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        let rx = match topics.get(topic) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(self.capacity);
                topics.insert(topic.to_string(), tx);
                rx
            }
        };
        Subscription {
            topic: topic.to_string(),
            rx,
        }
    }

    /// Drop a subscription and release its topic if it was the last one.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let topic = subscription.topic.clone();
        drop(subscription);
        self.release(&topic);
    }

    /// Remove `topic`'s channel if no subscriber is left on it.
    ///
    /// For callers whose subscription was dropped elsewhere, such as inside
    /// a cancelled task.
    pub fn release(&self, topic: &str) {
        self.prune(topic);
    }

    /// Returns the number of active subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    /// Number of topics with a live channel.
    pub fn topic_count(&self) -> usize {
        self.topics.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Stream of every envelope published by this process, for relays.
    pub fn local_feed(&self) -> broadcast::Receiver<EventEnvelope> {
        self.local_feed.subscribe()
    }

    fn prune(&self, topic: &str) {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        if topics
            .get(topic)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            topics.remove(topic);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================
