//! # Event Bus Module
//!
//! At-least-once publish/consume plumbing between the services and the
//! outside world (AI verification, contract issuance, the ledger side of
//! donation settlement).
//!
//! ## Delivery Model
//!
//! ```text
//! publish(topic, key, payload)
//!        │
//!        ▼  partition = hash(key) % partitions
//! ┌──────────────┬──────────────┬──────────────┐
//! │ partition 0  │ partition 1  │ partition N  │   one ordered queue each
//! └──────┬───────┴──────┬───────┴──────┬───────┘
//!        ▼              ▼              ▼
//!    consumer task  consumer task  consumer task    (consumer.rs)
//!        │ retry with backoff, then dead-letter
//! ```
//!
//! Messages with the same key (a donation id, a proof id) always land in
//! the same partition and are handled in publish order. Nothing is ordered
//! across keys.
//!
//! Topics nobody subscribes to in-process (requests for external services)
//! are still recorded in a bounded per-topic history.

pub mod consumer;
pub mod events;

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Topic names.
pub mod topics {
    pub const DONATION_EVENTS: &str = "donation-events";
    pub const CONTRACT_SIGN_REQUEST: &str = "contract-sign-request";
    pub const PROOF_VERIFICATION_REQUEST: &str = "proof-verification-request";
    pub const PROOF_VERIFICATION_RESULT: &str = "proof-verification-result";
    pub const HYBRID_REASONING_REQUEST: &str = "hybrid-reasoning-request";
}

/// How many messages per topic the history keeps.
const HISTORY_LIMIT: usize = 1024;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Failed to serialize payload for {topic}: {reason}")]
    Serialization { topic: String, reason: String },

    #[error("Topic {0} already has a consumer")]
    AlreadySubscribed(String),

    #[error("Consumer of {0} is gone")]
    Closed(String),

    /// Reported by bus implementations that talk to a broker.
    #[error("Bus unavailable: {0}")]
    Unavailable(String),
}

/// One message as seen by consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: Uuid,
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

/// Publishing side of the bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish `payload` on `topic`, partitioned by `key`.
    async fn publish(&self, topic: &str, key: &str, payload: serde_json::Value) -> Result<Uuid, BusError>;
}

/// Serialize `event` and publish it.
pub async fn publish_event<T: Serialize + Sync>(
    bus: &dyn EventBus,
    topic: &str,
    key: &str,
    event: &T,
) -> Result<Uuid, BusError> {
    let payload = serde_json::to_value(event).map_err(|e| BusError::Serialization {
        topic: topic.to_string(),
        reason: e.to_string(),
    })?;
    bus.publish(topic, key, payload).await
}

#[derive(Default)]
struct BusState {
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>>,
    history: HashMap<String, VecDeque<BusMessage>>,
}

/// Partitioned in-process bus.
///
/// ## Usage
///
/// ```rust,ignore
/// let bus = Arc::new(InProcessBus::new(4));
/// let receivers = bus.subscribe(topics::DONATION_EVENTS)?;
/// bus.publish(topics::DONATION_EVENTS, &donation_id.to_string(), payload).await?;
/// ```
pub struct InProcessBus {
    partitions: usize,
    state: Mutex<BusState>,
}

impl InProcessBus {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Mutex::new(BusState::default()),
        }
    }

    /// Partition a key is routed to. Stable for the life of the process.
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as usize
    }

    /// Create the consumer queues of `topic`, one per partition.
    ///
    /// A topic has at most one consumer group in-process.
    pub fn subscribe(&self, topic: &str) -> Result<Vec<mpsc::UnboundedReceiver<BusMessage>>, BusError> {
        let mut state = self.lock();
        if state.subscribers.contains_key(topic) {
            return Err(BusError::AlreadySubscribed(topic.to_string()));
        }

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..self.partitions).map(|_| mpsc::unbounded_channel()).unzip();
        state.subscribers.insert(topic.to_string(), senders);

        info!("Subscribed to {} ({} partitions)", topic, self.partitions);
        Ok(receivers)
    }

    /// Recently published messages of `topic`, oldest first.
    pub fn published(&self, topic: &str) -> Vec<BusMessage> {
        self.lock()
            .history
            .get(topic)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every consumer queue. Consumer tasks finish once their queue drains.
    pub fn close(&self) {
        let mut state = self.lock();
        let topics = state.subscribers.len();
        state.subscribers.clear();
        info!("Event bus closed ({} consumer groups)", topics);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        // A panic while holding this lock cannot leave the maps half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventBus for InProcessBus {
    async fn publish(&self, topic: &str, key: &str, payload: serde_json::Value) -> Result<Uuid, BusError> {
        let message = BusMessage {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
            published_at: Utc::now(),
        };
        let partition = self.partition_for(key);

        let mut state = self.lock();

        let history = state.history.entry(topic.to_string()).or_default();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(message.clone());

        if let Some(senders) = state.subscribers.get(topic) {
            senders[partition]
                .send(message.clone())
                .map_err(|_| BusError::Closed(topic.to_string()))?;
        }

        debug!("Published {} on {} (key {}, partition {})", message.id, topic, key, partition);
        Ok(message.id)
    }
}
