//! # Bus Consumers
//!
//! Runs a [`MessageHandler`] over every partition of a topic with an
//! explicit [`ConsumerPolicy`]: bounded attempts, exponential backoff and a
//! dead-letter store.
//!
//! ## Delivery Flow
//!
//! ```text
//! message ──► handle() ──Ok──────────────────────────► done
//!                │
//!                ├─Permanent──────────────────────────► dead letter
//!                │
//!                └─Transient──► attempts left? ─no────► dead letter
//!                                   │ yes
//!                                   ▼
//!                    sleep(initial * multiplier^(n-1), capped)
//!                                   │
//!                                   └──► handle() again
//! ```
//!
//! Dead letters keep the original topic, key and payload so they can be
//! replayed with [`replay_dead_letter`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{BusError, BusMessage, EventBus, InProcessBus};
use crate::config::AppConfig;
use crate::db::{DatabaseError, DeadLetterRecord, DeadLetterStore};

/// Why a handler could not process a message.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Worth retrying (store unavailable, timeout, ...).
    #[error("{0}")]
    Transient(String),

    /// Retrying cannot help (malformed payload, unknown entity, ...).
    #[error("{0}")]
    Permanent(String),
}

impl From<DatabaseError> for HandlerError {
    fn from(e: DatabaseError) -> Self {
        Self::Transient(e.to_string())
    }
}

/// Processes messages of one topic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError>;
}

/// Retry schedule of a consumer.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total deliveries, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.consumer_max_attempts,
            initial_backoff: config.consumer_initial_backoff,
            multiplier: config.consumer_backoff_multiplier,
            max_backoff: config.consumer_max_backoff,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Retry schedule plus where exhausted messages go.
#[derive(Clone)]
pub struct ConsumerPolicy {
    pub retry: RetryPolicy,
    pub dead_letters: Arc<dyn DeadLetterStore>,
}

/// Outcome of delivering one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Handled { attempts: u32 },
    DeadLettered { attempts: u32 },
}

/// Deliver `message` to `handler` under `policy`.
pub async fn deliver(handler: &dyn MessageHandler, message: &BusMessage, policy: &ConsumerPolicy) -> Delivery {
    let mut attempt = 1;

    loop {
        match handler.handle(message).await {
            Ok(()) => return Delivery::Handled { attempts: attempt },
            Err(HandlerError::Permanent(reason)) => {
                warn!(
                    "{} rejected message {} on {} permanently: {}",
                    handler.name(), message.id, message.topic, reason
                );
                dead_letter(policy.dead_letters.as_ref(), message, &reason, attempt).await;
                return Delivery::DeadLettered { attempts: attempt };
            }
            Err(HandlerError::Transient(reason)) if attempt >= policy.retry.max_attempts => {
                error!(
                    "{} gave up on message {} on {} after {} attempts: {}",
                    handler.name(), message.id, message.topic, attempt, reason
                );
                dead_letter(policy.dead_letters.as_ref(), message, &reason, attempt).await;
                return Delivery::DeadLettered { attempts: attempt };
            }
            Err(HandlerError::Transient(reason)) => {
                let delay = policy.retry.backoff_after(attempt);
                warn!(
                    "{} failed message {} (attempt {}/{}), retrying in {:?}: {}",
                    handler.name(), message.id, attempt, policy.retry.max_attempts, delay, reason
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

async fn dead_letter(store: &dyn DeadLetterStore, message: &BusMessage, reason: &str, attempts: u32) {
    let record = DeadLetterRecord {
        id: Uuid::new_v4(),
        topic: message.topic.clone(),
        partition_key: message.key.clone(),
        payload: message.payload.clone(),
        error: reason.to_string(),
        attempts: attempts as i32,
        created_at: Utc::now(),
        replayed_at: None,
    };

    if let Err(e) = store.record_dead_letter(&record).await {
        // Last resort: the full message goes to the log so it can be recovered by hand.
        error!(
            "Failed to store dead letter for {} on {} ({}); payload: {}",
            message.id, message.topic, e, message.payload
        );
    } else {
        info!("Message {} on {} dead-lettered as {}", message.id, message.topic, record.id);
    }
}

/// Start one task per partition of `topic`, each delivering its messages in order.
pub fn spawn_consumer(
    bus: &InProcessBus,
    topic: &str,
    handler: Arc<dyn MessageHandler>,
    policy: ConsumerPolicy,
) -> Result<Vec<JoinHandle<()>>, BusError> {
    let receivers = bus.subscribe(topic)?;
    let policy = Arc::new(policy);

    info!(
        "Starting {} on {} (max attempts {}, initial backoff {:?})",
        handler.name(), topic, policy.retry.max_attempts, policy.retry.initial_backoff
    );

    Ok(receivers
        .into_iter()
        .enumerate()
        .map(|(partition, mut rx)| {
            let handler = handler.clone();
            let policy = policy.clone();
            let topic = topic.to_string();
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    deliver(handler.as_ref(), &message, &policy).await;
                }
                info!("{} consumer for {} partition {} stopped", handler.name(), topic, partition);
            })
        })
        .collect())
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Dead letter not found: {0}")]
    NotFound(Uuid),

    #[error("Dead letter {0} was already replayed")]
    AlreadyReplayed(Uuid),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Publish a dead letter back onto its original topic.
pub async fn replay_dead_letter(
    store: &dyn DeadLetterStore,
    bus: &dyn EventBus,
    id: Uuid,
) -> Result<DeadLetterRecord, ReplayError> {
    let record = store.get_dead_letter(id).await?.ok_or(ReplayError::NotFound(id))?;
    if record.replayed_at.is_some() {
        return Err(ReplayError::AlreadyReplayed(id));
    }

    // Mark first so two concurrent replays cannot both publish.
    if !store.mark_dead_letter_replayed(id).await? {
        return Err(ReplayError::AlreadyReplayed(id));
    }
    if let Err(e) = bus.publish(&record.topic, &record.partition_key, record.payload.clone()).await {
        warn!("Replay of dead letter {} onto {} failed: {}", id, record.topic, e);
        // Keep the letter replayable.
        if let Err(unmark) = store.unmark_dead_letter_replayed(id).await {
            error!("🚨 Dead letter {} stays marked replayed after a failed publish: {}", id, unmark);
        }
        return Err(e.into());
    }

    info!("Replayed dead letter {} onto {}", id, record.topic);
    store.get_dead_letter(id).await?.ok_or(ReplayError::NotFound(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` deliveries.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        permanent: bool,
    }

    #[async_trait]
    impl MessageHandler for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, _message: &BusMessage) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                if self.permanent {
                    return Err(HandlerError::Permanent("bad payload".to_string()));
                }
                return Err(HandlerError::Transient(format!("boom #{}", call)));
            }
            Ok(())
        }
    }

    fn message() -> BusMessage {
        BusMessage {
            id: Uuid::new_v4(),
            topic: "proof-verification-result".to_string(),
            key: "proof-1".to_string(),
            payload: json!({ "proofId": "proof-1" }),
            published_at: Utc::now(),
        }
    }

    fn policy(store: Arc<MemoryStore>) -> ConsumerPolicy {
        ConsumerPolicy {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                multiplier: 2.0,
                max_backoff: Duration::from_millis(5),
            },
            dead_letters: store,
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff_after(1), Duration::from_millis(1000));
        assert_eq!(retry.backoff_after(2), Duration::from_millis(2000));
        assert_eq!(retry.backoff_after(3), Duration::from_millis(4000));
        assert_eq!(retry.backoff_after(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_budget() {
        let store = Arc::new(MemoryStore::new());
        let handler = Flaky { failures: 2, calls: AtomicU32::new(0), permanent: false };

        let outcome = deliver(&handler, &message(), &policy(store.clone())).await;

        assert_eq!(outcome, Delivery::Handled { attempts: 3 });
        assert!(store.list_dead_letters(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_dead_lettered() {
        let store = Arc::new(MemoryStore::new());
        let handler = Flaky { failures: 10, calls: AtomicU32::new(0), permanent: false };
        let msg = message();

        let outcome = deliver(&handler, &msg, &policy(store.clone())).await;

        assert_eq!(outcome, Delivery::DeadLettered { attempts: 3 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let letters = store.list_dead_letters(10, 0).await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].partition_key, "proof-1");
        assert_eq!(letters[0].payload, msg.payload);
        assert_eq!(letters[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let store = Arc::new(MemoryStore::new());
        let handler = Flaky { failures: 1, calls: AtomicU32::new(0), permanent: true };

        let outcome = deliver(&handler, &message(), &policy(store.clone())).await;

        assert_eq!(outcome, Delivery::DeadLettered { attempts: 1 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replay_republishes_once() {
        let store = Arc::new(MemoryStore::new());
        let bus = InProcessBus::new(2);
        let handler = Flaky { failures: 1, calls: AtomicU32::new(0), permanent: true };
        deliver(&handler, &message(), &policy(store.clone())).await;
        let letter = store.list_dead_letters(10, 0).await.unwrap().remove(0);

        let replayed = replay_dead_letter(store.as_ref(), &bus, letter.id).await.unwrap();
        assert!(replayed.replayed_at.is_some());
        assert_eq!(bus.published("proof-verification-result").len(), 1);

        let again = replay_dead_letter(store.as_ref(), &bus, letter.id).await;
        assert!(matches!(again, Err(ReplayError::AlreadyReplayed(_))));
    }

    #[tokio::test]
    async fn test_failed_replay_keeps_letter_replayable() {
        let store = Arc::new(MemoryStore::new());
        let handler = Flaky { failures: 1, calls: AtomicU32::new(0), permanent: true };
        deliver(&handler, &message(), &policy(store.clone())).await;
        let letter = store.list_dead_letters(10, 0).await.unwrap().remove(0);

        // A consumer group whose queues are gone.
        let bus = InProcessBus::new(1);
        drop(bus.subscribe("proof-verification-result").unwrap());

        let first = replay_dead_letter(store.as_ref(), &bus, letter.id).await;
        assert!(matches!(first, Err(ReplayError::Bus(BusError::Closed(_)))));
        let stored = store.get_dead_letter(letter.id).await.unwrap().unwrap();
        assert!(stored.replayed_at.is_none());

        // Once a consumer is back the same letter goes through.
        bus.close();
        let _queues = bus.subscribe("proof-verification-result").unwrap();
        let replayed = replay_dead_letter(store.as_ref(), &bus, letter.id).await.unwrap();
        assert!(replayed.replayed_at.is_some());
    }
}
