//! Message bus trait - topic-based fan-out with durable queues
//!
//! Stage workers hand sagas to each other exclusively through the bus.
//! Delivery is at-least-once: a message stays in flight until the consumer
//! acks it; unacked messages are redelivered after a visibility window, and
//! `nack` requeues explicitly with a delay. Duplicate deliveries are expected
//! and must be neutralised by the consumer's own idempotency check.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Saga stage hand-off envelope
///
/// Envelopes stay small; heavy state lives in the state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEnvelope {
    /// Saga being advanced
    pub saga_id: Uuid,
    /// Tenant that owns the saga
    pub tenant_id: String,
    /// Optional hint for the receiving stage (e.g. a reflection marker)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_hint: Option<String>,
}

impl StageEnvelope {
    /// Create an envelope for a saga
    pub fn new(saga_id: Uuid, tenant_id: impl Into<String>) -> Self {
        StageEnvelope {
            saga_id,
            tenant_id: tenant_id.into(),
            stage_hint: None,
        }
    }

    /// Attach a stage hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.stage_hint = Some(hint.into());
        self
    }
}

/// A message pulled from a topic, holding its ack token
///
/// Dropping a delivery without acking leaves the message in flight; it will
/// be redelivered once the visibility window elapses.
pub struct Delivery {
    /// Message payload
    pub payload: Value,
    /// Delivery attempt, starting at 1
    pub attempt: u32,
    acker: Box<dyn Acker>,
}

impl Delivery {
    /// Decode the payload as a stage envelope
    pub fn envelope(&self) -> Result<StageEnvelope> {
        serde_json::from_value(self.payload.clone()).map_err(Error::from)
    }

    /// Acknowledge the message; it will not be redelivered
    pub async fn ack(self) {
        self.acker.ack().await;
    }

    /// Return the message to the queue after a delay
    pub async fn nack(self, delay: Duration) {
        self.acker.nack(delay).await;
    }
}

#[async_trait]
trait Acker: Send + Sync {
    async fn ack(self: Box<Self>);
    async fn nack(self: Box<Self>, delay: Duration);
}

/// Abstract interface for the message bus
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message to a topic
    async fn publish(&self, topic: &str, payload: Value) -> Result<()>;

    /// Pull the next message from a topic, waiting until one is available
    ///
    /// Concurrent consumers on the same topic compete for messages.
    async fn consume(&self, topic: &str) -> Result<Delivery>;
}

/// Publish a stage envelope
pub async fn publish_envelope(
    bus: &dyn MessageBus,
    topic: &str,
    envelope: &StageEnvelope,
) -> Result<()> {
    bus.publish(topic, serde_json::to_value(envelope)?).await
}

// ---------------------------------------------------------------------------
// In-process implementation
// ---------------------------------------------------------------------------

struct Queued {
    id: u64,
    payload: Value,
    attempt: u32,
    not_before: Option<Instant>,
}

struct InFlight {
    payload: Value,
    attempt: u32,
    delivered_at: Instant,
}

#[derive(Default)]
struct TopicState {
    queue: Mutex<VecDeque<Queued>>,
    in_flight: Mutex<HashMap<u64, InFlight>>,
    notify: Notify,
}

/// In-process message bus with at-least-once delivery
///
/// Single-node deployments and tests run on this; external brokers integrate
/// behind the `MessageBus` trait.
#[derive(Clone, Default)]
pub struct MemoryBus {
    topics: Arc<Mutex<HashMap<String, Arc<TopicState>>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryBus {
    /// Create a new empty bus
    pub fn new() -> Self {
        Self::default()
    }

    async fn topic(&self, name: &str) -> Arc<TopicState> {
        let mut topics = self.topics.lock().await;
        topics.entry(name.to_string()).or_default().clone()
    }

    /// Requeue in-flight messages older than `visibility`
    ///
    /// Run on a periodic tick; this is what turns a crashed (never-acked)
    /// consumer into a redelivery.
    pub async fn redeliver_expired(&self, visibility: Duration) -> usize {
        let now = Instant::now();
        let topics: Vec<Arc<TopicState>> =
            self.topics.lock().await.values().cloned().collect();

        let mut redelivered = 0;
        for state in topics {
            let mut in_flight = state.in_flight.lock().await;
            let expired: Vec<u64> = in_flight
                .iter()
                .filter(|(_, m)| m.delivered_at + visibility <= now)
                .map(|(id, _)| *id)
                .collect();

            if expired.is_empty() {
                continue;
            }

            let mut queue = state.queue.lock().await;
            for id in expired {
                if let Some(m) = in_flight.remove(&id) {
                    queue.push_back(Queued {
                        id,
                        payload: m.payload,
                        attempt: m.attempt + 1,
                        not_before: None,
                    });
                    redelivered += 1;
                }
            }
            drop(queue);
            state.notify.notify_waiters();
        }
        redelivered
    }

    /// Number of queued (not in-flight) messages on a topic
    pub async fn queued_len(&self, topic: &str) -> usize {
        self.topic(topic).await.queue.lock().await.len()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        let state = self.topic(topic).await;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        state.queue.lock().await.push_back(Queued {
            id,
            payload,
            attempt: 1,
            not_before: None,
        });
        state.notify.notify_one();
        Ok(())
    }

    async fn consume(&self, topic: &str) -> Result<Delivery> {
        let state = self.topic(topic).await;

        loop {
            {
                let now = Instant::now();
                let mut queue = state.queue.lock().await;
                let ready = queue
                    .iter()
                    .position(|m| m.not_before.is_none_or(|at| at <= now));

                if let Some(msg) = ready.and_then(|idx| queue.remove(idx)) {
                    drop(queue);

                    state.in_flight.lock().await.insert(
                        msg.id,
                        InFlight {
                            payload: msg.payload.clone(),
                            attempt: msg.attempt,
                            delivered_at: now,
                        },
                    );

                    return Ok(Delivery {
                        payload: msg.payload,
                        attempt: msg.attempt,
                        acker: Box::new(MemoryAcker {
                            state: state.clone(),
                            id: msg.id,
                        }),
                    });
                }
            }

            // Delayed messages become ready without a notify, so cap the wait.
            let _ = tokio::time::timeout(Duration::from_millis(50), state.notify.notified()).await;
        }
    }
}

struct MemoryAcker {
    state: Arc<TopicState>,
    id: u64,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(self: Box<Self>) {
        self.state.in_flight.lock().await.remove(&self.id);
    }

    async fn nack(self: Box<Self>, delay: Duration) {
        let msg = self.state.in_flight.lock().await.remove(&self.id);
        if let Some(m) = msg {
            self.state.queue.lock().await.push_back(Queued {
                id: self.id,
                payload: m.payload,
                attempt: m.attempt + 1,
                not_before: Some(Instant::now() + delay),
            });
            self.state.notify.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_consume_ack() {
        let bus = MemoryBus::new();
        bus.publish("t", json!({"n": 1})).await.unwrap();

        let delivery = bus.consume("t").await.unwrap();
        assert_eq!(delivery.payload, json!({"n": 1}));
        assert_eq!(delivery.attempt, 1);
        delivery.ack().await;

        assert_eq!(bus.queued_len("t").await, 0);
        assert_eq!(bus.redeliver_expired(Duration::ZERO).await, 0);
    }

    #[tokio::test]
    async fn test_unacked_message_redelivers() {
        let bus = MemoryBus::new();
        bus.publish("t", json!("payload")).await.unwrap();

        let delivery = bus.consume("t").await.unwrap();
        drop(delivery); // consumer died without acking

        assert_eq!(bus.redeliver_expired(Duration::ZERO).await, 1);

        let again = bus.consume("t").await.unwrap();
        assert_eq!(again.payload, json!("payload"));
        assert_eq!(again.attempt, 2);
        again.ack().await;
    }

    #[tokio::test]
    async fn test_nack_requeues_with_delay() {
        let bus = MemoryBus::new();
        bus.publish("t", json!(1)).await.unwrap();

        let delivery = bus.consume("t").await.unwrap();
        delivery.nack(Duration::from_millis(20)).await;

        // Not ready yet, ready after the delay elapses.
        let redelivered =
            tokio::time::timeout(Duration::from_millis(500), bus.consume("t")).await;
        let delivery = redelivered.expect("message became ready").unwrap();
        assert_eq!(delivery.attempt, 2);
        delivery.ack().await;
    }

    #[tokio::test]
    async fn test_stage_envelope_roundtrip() {
        let bus = MemoryBus::new();
        let envelope = StageEnvelope::new(Uuid::new_v4(), "acme").with_hint("reflect");

        publish_envelope(&bus, "q.initiated", &envelope).await.unwrap();

        let delivery = bus.consume("q.initiated").await.unwrap();
        let decoded = delivery.envelope().unwrap();
        assert_eq!(decoded.saga_id, envelope.saga_id);
        assert_eq!(decoded.tenant_id, "acme");
        assert_eq!(decoded.stage_hint.as_deref(), Some("reflect"));
        delivery.ack().await;
    }
}
