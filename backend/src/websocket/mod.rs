//! # WebSocket Module
//!
//! One-way real-time push to browsers following a campaign or a withdrawal.
//!
//! ## Topics
//!
//! | Endpoint | Topic | Events |
//! |----------|-------|--------|
//! | `/ws/campaigns/{id}/stats` | `campaign:{id}:stats` | `campaign_stats` |
//! | `/ws/campaigns/{id}/activity` | `campaign:{id}:activity` | `donation_activity` |
//! | `/ws/withdrawals/{id}/proof` | `withdrawal:{id}:proof` | `proof_update`, `proof_review_candidate` |
//!
//! ## Connection Flow
//!
//! ```text
//! 1. Client connects to one of the endpoints above
//!              ↓
//! 2. Server registers the connection under the topic
//!              ↓
//! 3. Server sends a `connected` event
//!              ↓
//! 4. Events published on the topic are pushed as they occur
//! ```
//!
//! No acknowledgment is expected; a client that is not connected when an
//! event is published simply misses it.
//!
//! ## Message Format
//!
//! ```json
//! {
//!     "event": "campaign_stats",
//!     "data": {
//!         "campaignId": "…",
//!         "currentAmount": 900000,
//!         "donationCount": 12,
//!         "lastDonorName": "Lan"
//!     },
//!     "timestamp": "2024-01-15T12:00:00Z"
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::Message;
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::AppState;

/// Topic carrying a campaign's running totals.
pub fn stats_topic(campaign_id: Uuid) -> String {
    format!("campaign:{}:stats", campaign_id)
}

/// Topic carrying a campaign's donation feed.
pub fn activity_topic(campaign_id: Uuid) -> String {
    format!("campaign:{}:activity", campaign_id)
}

/// Topic carrying verification updates of a withdrawal's proofs.
pub fn proof_topic(withdrawal_id: Uuid) -> String {
    format!("withdrawal:{}:proof", withdrawal_id)
}

/// WebSocket event types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsEventType {
    /// Connection accepted.
    Connected,
    /// Campaign totals changed.
    CampaignStats,
    /// A donation was confirmed.
    DonationActivity,
    /// A proof received an AI verdict.
    ProofUpdate,
    /// A proof scored above the high-confidence threshold.
    ProofReviewCandidate,
    /// Ping/pong for keepalive.
    Ping,
}

/// WebSocket message wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMessage<T> {
    pub event: WsEventType,
    pub data: T,
    pub timestamp: chrono::DateTime<Utc>,
}

impl<T: Serialize> WsMessage<T> {
    pub fn new(event: WsEventType, data: T) -> Self {
        Self {
            event,
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// `campaign_stats` event data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStatsData {
    pub campaign_id: Uuid,
    pub current_amount: i64,
    pub target_amount: Option<i64>,
    pub donation_count: Option<i64>,
    pub last_donor_name: String,
}

/// `donation_activity` event data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DonationActivityData {
    pub campaign_id: Uuid,
    pub donation_id: Uuid,
    pub donor_name: String,
    pub amount: i64,
    pub message: Option<String>,
    pub text: String,
}

/// `proof_update` / `proof_review_candidate` event data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProofUpdateData {
    pub proof_id: Uuid,
    pub withdrawal_id: Uuid,
    pub ai_status: String,
    pub ai_score: Option<i32>,
    pub ai_analysis: Option<String>,
}

/// WebSocket connection registry.
///
/// Tracks active sessions per topic. A topic can have many connections
/// (several viewers of the same campaign).
#[derive(Clone)]
pub struct WsRegistry {
    /// Map of topic -> one sender per connection
    sessions: Arc<Mutex<HashMap<String, Vec<broadcast::Sender<String>>>>>,
}

impl WsRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new connection on `topic`.
    /// Returns a receiver that will receive the topic's messages.
    pub async fn register(&self, topic: String) -> broadcast::Receiver<String> {
        let mut sessions = self.sessions.lock().await;
        let (tx, rx) = broadcast::channel(100); // Buffer up to 100 messages

        let senders = sessions.entry(topic.clone()).or_insert_with(Vec::new);
        senders.push(tx);

        info!("Registered WebSocket on {} (total connections: {})", topic, senders.len());

        rx
    }

    /// Drop the senders of `topic` whose receivers are gone.
    pub async fn unregister(&self, topic: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(senders) = sessions.get_mut(topic) {
            senders.retain(|tx| tx.receiver_count() > 0);

            if senders.is_empty() {
                sessions.remove(topic);
                info!("Unregistered all WebSocket connections on {}", topic);
            } else {
                info!("Unregistered one WebSocket connection on {} (remaining: {})", topic, senders.len());
            }
        }
    }

    /// Push an event to every connection on `topic`.
    ///
    /// ## Returns
    ///
    /// * `Ok(n)` - number of connections reached (0 when nobody listens)
    /// * `Err(String)` - the event could not be serialized
    pub async fn send_to_topic<T: Serialize>(
        &self,
        topic: &str,
        event: WsEventType,
        data: T,
    ) -> Result<usize, String> {
        let json = WsMessage::new(event, data)
            .to_json()
            .map_err(|e| format!("Failed to serialize message: {}", e))?;

        let mut sessions = self.sessions.lock().await;

        let Some(senders) = sessions.get_mut(topic) else {
            debug!("No active WebSocket connections on {}", topic);
            return Ok(0);
        };

        // A failed send means the receiver is gone.
        senders.retain(|sender| sender.receiver_count() > 0 && sender.send(json.clone()).is_ok());
        let sent = senders.len();

        if senders.is_empty() {
            sessions.remove(topic);
        } else {
            debug!("Sent message on {} ({} connections)", topic, sent);
        }

        Ok(sent)
    }

    pub async fn connection_count(&self, topic: &str) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.get(topic).map(|v| v.len()).unwrap_or(0)
    }

    pub async fn total_connections(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.values().map(|v| v.len()).sum()
    }
}

impl Default for WsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Configure WebSocket routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws/campaigns/{id}/stats", web::get().to(campaign_stats_ws))
        .route("/ws/campaigns/{id}/activity", web::get().to(campaign_activity_ws))
        .route("/ws/withdrawals/{id}/proof", web::get().to(withdrawal_proof_ws));
}

/// `GET /ws/campaigns/{id}/stats`
pub async fn campaign_stats_ws(
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Payload,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse, actix_web::Error> {
    serve_topic(req, body, &state, stats_topic(path.into_inner()))
}

/// `GET /ws/campaigns/{id}/activity`
pub async fn campaign_activity_ws(
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Payload,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse, actix_web::Error> {
    serve_topic(req, body, &state, activity_topic(path.into_inner()))
}

/// `GET /ws/withdrawals/{id}/proof`
///
/// ## Example (JavaScript)
///
/// ```javascript
/// const ws = new WebSocket('ws://localhost:8080/ws/withdrawals/6a1f.../proof');
///
/// ws.onmessage = (event) => {
///     const message = JSON.parse(event.data);
///     console.log(message.event, message.data.aiScore);
/// };
/// ```
pub async fn withdrawal_proof_ws(
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Payload,
    state: web::Data<Arc<AppState>>,
) -> Result<HttpResponse, actix_web::Error> {
    serve_topic(req, body, &state, proof_topic(path.into_inner()))
}

/// Upgrade the request and forward everything published on `topic`.
fn serve_topic(
    req: HttpRequest,
    body: web::Payload,
    state: &Arc<AppState>,
    topic: String,
) -> Result<HttpResponse, actix_web::Error> {
    info!("WebSocket connection request for {}", topic);

    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;
    let ws_registry = state.ws_registry.clone();

    actix_rt::spawn(async move {
        let mut rx = ws_registry.register(topic.clone()).await;

        let welcome = WsMessage::new(
            WsEventType::Connected,
            serde_json::json!({ "status": "connected", "topic": topic }),
        );
        if let Ok(json) = welcome.to_json() {
            if let Err(e) = session.text(json).await {
                error!("Failed to send welcome message: {}", e);
            }
        }

        // Forward published events to the socket
        let mut forward_session = session.clone();
        let forward_topic = topic.clone();
        let forward_registry = ws_registry.clone();
        actix_rt::spawn(async move {
            while let Ok(msg) = rx.recv().await {
                if let Err(e) = forward_session.text(msg).await {
                    debug!("WebSocket session on {} closed: {}. Stopping forwarding.", forward_topic, e);
                    break;
                }
            }
            drop(rx);
            forward_registry.unregister(&forward_topic).await;
        });

        // Handle incoming frames
        while let Some(Ok(msg)) = msg_stream.next().await {
            match msg {
                Message::Ping(bytes) => {
                    let _ = session.pong(&bytes).await;
                }
                Message::Text(text) => {
                    debug!("Ignoring client text on {}: {}", topic, text);
                    let pong = WsMessage::new(WsEventType::Ping, serde_json::json!({ "topic": topic }));
                    if let Ok(json) = pong.to_json() {
                        let _ = session.text(json).await;
                    }
                }
                Message::Binary(_) => {
                    warn!("Received unexpected binary message on {}", topic);
                }
                Message::Close(reason) => {
                    info!("WebSocket on {} closed: {:?}", topic, reason);
                    break;
                }
                _ => {}
            }
        }

        let _ = session.close(None).await;
        info!("WebSocket disconnected from {}", topic);
    });

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_only_topic_subscribers() {
        let registry = WsRegistry::new();
        let campaign = Uuid::new_v4();
        let mut stats_rx = registry.register(stats_topic(campaign)).await;
        let mut activity_rx = registry.register(activity_topic(campaign)).await;

        let sent = registry
            .send_to_topic(
                &stats_topic(campaign),
                WsEventType::CampaignStats,
                CampaignStatsData {
                    campaign_id: campaign,
                    current_amount: 900_000,
                    target_amount: Some(1_000_000),
                    donation_count: Some(3),
                    last_donor_name: "Lan".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(sent, 1);
        let raw = stats_rx.try_recv().unwrap();
        let message: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(message["event"], "campaign_stats");
        assert_eq!(message["data"]["currentAmount"], 900_000);
        assert!(activity_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_connections_are_pruned() {
        let registry = WsRegistry::new();
        let topic = proof_topic(Uuid::new_v4());
        let rx = registry.register(topic.clone()).await;
        let _live = registry.register(topic.clone()).await;
        drop(rx);

        let sent = registry.send_to_topic(&topic, WsEventType::Ping, ()).await.unwrap();

        assert_eq!(sent, 1);
        assert_eq!(registry.connection_count(&topic).await, 1);
        assert_eq!(registry.total_connections().await, 1);
    }

    #[tokio::test]
    async fn test_no_listeners_is_not_an_error() {
        let registry = WsRegistry::new();
        let sent = registry.send_to_topic("campaign:x:stats", WsEventType::Ping, ()).await.unwrap();
        assert_eq!(sent, 0);
    }
}
