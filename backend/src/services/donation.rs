//! # Donation Settlement Pipeline
//!
//! Owns the donation lifecycle `PENDING → COMPLETED`.
//!
//! ## Settlement Flow
//!
//! ```text
//! POST /donations/init ──► PENDING donation + payment code + VietQR link
//!                                      │
//!     donor transfers money with the code in the description
//!                                      ▼
//! POST /webhook/payment ──► match code, check amount
//!                           publish donation-events ──► mark COMPLETED
//!                                      │
//!                                      ▼  (DonationEventHandler, bus consumer)
//!                           ledger DEPOSIT "donation:<id>"
//!                                      │
//!                                      ▼
//!            settle_by_external_callback(donation, entry hash)
//!              ├─ idempotency marker + donation update (one transaction)
//!              └─ best-effort fan-out, each step on its own:
//!                   campaign running total ── cache (existing entries only)
//!                   ── stats + activity pushed over WebSocket
//! ```
//!
//! The marker write is the only hard consistency boundary. Fan-out
//! failures are logged and recorded for reconciliation; they never undo a
//! committed settlement.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use regex::Regex;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::bus::consumer::{HandlerError, MessageHandler};
use crate::bus::events::DonationEvent;
use crate::bus::{publish_event, topics, BusMessage, EventBus};
use crate::cache::CampaignCache;
use crate::config::AppConfig;
use crate::db::{
    CampaignStatus, CampaignStore, DonationRecord, DonationStatus, DonationStore, IdempotencyStore,
    ReconciliationLog, ReconciliationStore, SettlementWrite, Stores, TransactionType,
};
use crate::errors::AppError;
use crate::models::{DonationCompleteRequest, InitDonationRequest, PaymentWebhookRequest};
use crate::services::ledger::{AppendRequest, Ledger};
use crate::utils::{format_vnd, truncate_string};
use crate::websocket::{
    activity_topic, stats_topic, CampaignStatsData, DonationActivityData, WsEventType, WsRegistry,
};

const PAYMENT_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const PAYMENT_CODE_SUFFIX_LEN: usize = 10;
const VIETQR_BASE_URL: &str = "https://img.vietqr.io";
const SWEEP_BATCH: i64 = 100;

/// Pattern of a payment code inside a transfer description.
fn payment_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"TS\d{13}[A-Z0-9]{10}").expect("valid payment code pattern"))
}

/// `TS` + 13-digit epoch millis + 10 random upper-case alphanumerics.
pub fn generate_payment_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..PAYMENT_CODE_SUFFIX_LEN)
        .map(|_| PAYMENT_CODE_CHARSET[rng.gen_range(0..PAYMENT_CODE_CHARSET.len())] as char)
        .collect();
    format!("TS{:013}{}", Utc::now().timestamp_millis(), suffix)
}

/// First payment code found in a free-text transfer description.
pub fn extract_payment_code(description: &str) -> Option<&str> {
    payment_code_pattern().find(description).map(|m| m.as_str())
}

/// Idempotency marker of a settlement. One settlement per donation.
fn settlement_marker(donation_id: Uuid) -> String {
    format!("settlement:{}", donation_id)
}

/// A started donation and how to pay for it.
#[derive(Debug, Clone)]
pub struct DonationInit {
    pub donation: DonationRecord,

    /// What the donor asked to give, before clamping.
    pub requested_amount: i64,

    /// VietQR image the donor scans.
    pub qr_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Donation confirmed and handed to the ledger.
    Accepted(Uuid),
    /// The donation was already COMPLETED; nothing changed.
    AlreadyCompleted(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled,
    AlreadyProcessed,
}

/// Single owner of donation state.
#[derive(Clone)]
pub struct DonationService {
    campaigns: Arc<dyn CampaignStore>,
    donations: Arc<dyn DonationStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    reconciliation: Arc<dyn ReconciliationStore>,
    bus: Arc<dyn EventBus>,
    cache: Arc<dyn CampaignCache>,
    ws: WsRegistry,
    bank_id: String,
    account_no: String,
}

impl DonationService {
    pub fn new(
        stores: &Stores,
        bus: Arc<dyn EventBus>,
        cache: Arc<dyn CampaignCache>,
        ws: WsRegistry,
        config: &AppConfig,
    ) -> Self {
        Self {
            campaigns: stores.campaigns.clone(),
            donations: stores.donations.clone(),
            idempotency: stores.idempotency.clone(),
            reconciliation: stores.reconciliation.clone(),
            bus,
            cache,
            ws,
            bank_id: config.payment_bank_id.clone(),
            account_no: config.payment_account_no.clone(),
        }
    }

    /// Create a PENDING donation and its payment instruction.
    ///
    /// The amount is clamped to what the campaign still needs.
    ///
    /// ## Errors
    ///
    /// * `CAMPAIGN_NOT_FOUND` - no such campaign
    /// * `CAMPAIGN_NOT_ACTIVE` - campaign is not taking donations
    /// * `INVALID_DONATION_AMOUNT` - amount not positive, or the target is already met
    pub async fn initialize_donation(&self, request: InitDonationRequest) -> Result<DonationInit, AppError> {
        let campaign = self
            .campaigns
            .get_campaign(request.campaign_id)
            .await?
            .ok_or(AppError::CampaignNotFound(request.campaign_id))?;

        if campaign.status != CampaignStatus::Active {
            return Err(AppError::CampaignNotActive(campaign.id));
        }
        if request.amount <= 0 {
            return Err(AppError::InvalidDonationAmount("amount must be greater than 0".to_string()));
        }

        let remaining = campaign.remaining_need();
        if remaining <= 0 {
            return Err(AppError::InvalidDonationAmount(format!(
                "campaign {} has reached its target",
                campaign.id
            )));
        }

        let amount = request.amount.min(remaining);
        if amount < request.amount {
            info!(
                "Donation to {} clamped from {} to remaining need {}",
                campaign.id, request.amount, amount
            );
        }

        let donation = DonationRecord {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            donor_name: request
                .donor_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Anonymous".to_string()),
            donor_email: request.donor_email,
            message: request.message,
            amount,
            payment_code: generate_payment_code(),
            status: DonationStatus::Pending,
            external_ref: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let qr_url = self
            .qr_url(amount, &donation.payment_code, &campaign.title)
            .map_err(|e| AppError::Internal(format!("payment QR link: {}", e)))?;
        self.donations.insert_donation(&donation).await?;

        info!(
            "💰 Donation {} initialized: {} to campaign {} (code {})",
            donation.id, format_vnd(amount), campaign.id, donation.payment_code
        );

        Ok(DonationInit {
            donation,
            requested_amount: request.amount,
            qr_url,
        })
    }

    /// Handle a payment-provider notification.
    ///
    /// The donation is only marked COMPLETED after its event is on the bus,
    /// so a bus outage leaves it PENDING and the provider's retry can
    /// settle it later.
    pub async fn settle_by_webhook(&self, payload: PaymentWebhookRequest) -> Result<WebhookOutcome, AppError> {
        let code = extract_payment_code(&payload.content)
            .ok_or_else(|| AppError::InvalidPaymentReference(truncate_string(&payload.content, 64)))?;

        let donation = self
            .donations
            .get_donation_by_payment_code(code)
            .await?
            .ok_or_else(|| AppError::DonationNotFound(code.to_string()))?;

        if payload.transfer_amount != donation.amount {
            warn!(
                "Transfer for donation {} has amount {} but {} was expected",
                donation.id, payload.transfer_amount, donation.amount
            );
            return Err(AppError::InvalidDonationAmount(format!(
                "transferred {} but donation {} expects {}",
                payload.transfer_amount, donation.id, donation.amount
            )));
        }

        if donation.status == DonationStatus::Completed {
            info!("Webhook replay for completed donation {}, ignoring", donation.id);
            return Ok(WebhookOutcome::AlreadyCompleted(donation.id));
        }

        self.publish_donation_event(&donation).await?;

        if !self.donations.mark_donation_completed(donation.id).await? {
            debug!("Donation {} was completed concurrently", donation.id);
        }

        info!(
            "✅ Payment received for donation {} ({}, ref {:?})",
            donation.id,
            format_vnd(donation.amount),
            payload.reference_code
        );
        Ok(WebhookOutcome::Accepted(donation.id))
    }

    /// Apply a settlement confirmed by the ledger side.
    ///
    /// The settlement id is the donation id. Replays are absorbed by the
    /// idempotency marker, which is written in the same transaction as the
    /// donation update.
    pub async fn settle_by_external_callback(
        &self,
        request: DonationCompleteRequest,
    ) -> Result<SettlementOutcome, AppError> {
        let marker = settlement_marker(request.donation_id);

        if self.idempotency.is_processed(&marker).await? {
            info!("Settlement of donation {} already processed", request.donation_id);
            return Ok(SettlementOutcome::AlreadyProcessed);
        }

        let donation = self
            .donations
            .get_donation(request.donation_id)
            .await?
            .ok_or_else(|| AppError::DonationNotFound(request.donation_id.to_string()))?;

        if donation.campaign_id != request.campaign_id {
            return Err(AppError::Validation(format!(
                "donation {} belongs to campaign {}, not {}",
                donation.id, donation.campaign_id, request.campaign_id
            )));
        }
        if donation.amount != request.amount {
            return Err(AppError::InvalidDonationAmount(format!(
                "settlement of {} but donation {} is {}",
                request.amount, donation.id, donation.amount
            )));
        }

        match self
            .donations
            .complete_settlement(&marker, donation.id, &request.transaction_hash)
            .await?
        {
            SettlementWrite::AlreadyProcessed => {
                info!("Settlement of donation {} raced with a replay, skipping", donation.id);
                return Ok(SettlementOutcome::AlreadyProcessed);
            }
            SettlementWrite::Applied => {}
        }

        info!(
            "Donation {} settled (ref {})",
            donation.id,
            truncate_string(&request.transaction_hash, 19)
        );

        self.fan_out(&donation).await;
        Ok(SettlementOutcome::Settled)
    }

    /// Run the settlement sweep forever.
    ///
    /// A donation is marked COMPLETED as soon as its event is queued. If the
    /// process stops before the consumer credits it, nothing else would
    /// ever publish that event again; this loop does.
    ///
    /// ```rust,ignore
    /// tokio::spawn(async move { donations.start_settlement_sweep(300).await });
    /// ```
    pub async fn start_settlement_sweep(&self, interval_secs: u64) {
        info!("Starting settlement sweep (interval: {}s)", interval_secs);

        let grace = Duration::from_secs(interval_secs);
        let mut ticker = interval(grace);

        loop {
            ticker.tick().await;

            match self.redeliver_unsettled(grace).await {
                Ok(0) => debug!("No unsettled donations"),
                Ok(n) => info!("Settlement sweep re-published {} donation events", n),
                Err(e) => error!("Settlement sweep failed: {}", e),
            }
        }
    }

    /// Re-publish the event of every COMPLETED donation that has had no
    /// settlement for at least `grace`.
    ///
    /// The consumer is idempotent on both the ledger reference and the
    /// settlement marker, so a donation whose first event is still in
    /// flight is credited once. Returns how many events were published.
    pub async fn redeliver_unsettled(&self, grace: Duration) -> Result<usize, AppError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let unsettled = self.donations.list_unsettled_donations(cutoff, SWEEP_BATCH).await?;

        let mut published = 0;
        for donation in &unsettled {
            warn!(
                "Donation {} completed at {:?} but never settled, re-publishing",
                donation.id, donation.completed_at
            );
            match self.publish_donation_event(donation).await {
                Ok(()) => published += 1,
                Err(e) => warn!("Could not re-publish donation {}: {}", donation.id, e),
            }
        }

        Ok(published)
    }

    pub async fn get_donation(&self, donation_id: Uuid) -> Result<DonationRecord, AppError> {
        self.donations
            .get_donation(donation_id)
            .await?
            .ok_or_else(|| AppError::DonationNotFound(donation_id.to_string()))
    }

    pub async fn list_donations(
        &self,
        campaign_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DonationRecord>, AppError> {
        Ok(self.donations.list_donations_by_campaign(campaign_id, limit, offset).await?)
    }

    // ==========================================
    // FAN-OUT
    // ==========================================

    /// Best-effort updates after a committed settlement.
    async fn fan_out(&self, donation: &DonationRecord) {
        let campaign_id = donation.campaign_id;

        // Read-model running total
        let store_total = match self.campaigns.increment_current_amount(campaign_id, donation.amount).await {
            Ok(Some(total)) => Some(total),
            Ok(None) => {
                warn!("Campaign {} missing while crediting donation {}", campaign_id, donation.id);
                self.record_failure(donation, "READ_MODEL_UPDATE_FAILED", "campaign not found").await;
                None
            }
            Err(e) => {
                warn!("Failed to increment total of campaign {}: {}", campaign_id, e);
                self.record_failure(donation, "READ_MODEL_UPDATE_FAILED", &e.to_string()).await;
                None
            }
        };

        // Cache, only if the campaign is already cached
        let cached_total = match self.cache.increment_if_present(campaign_id, donation.amount).await {
            Ok(total) => total,
            Err(e) => {
                warn!("Failed to update amount cache of campaign {}: {}", campaign_id, e);
                self.record_failure(donation, "CACHE_UPDATE_FAILED", &e.to_string()).await;
                None
            }
        };

        let campaign = match self.campaigns.get_campaign(campaign_id).await {
            Ok(campaign) => campaign,
            Err(e) => {
                warn!("Could not read campaign {} for notification: {}", campaign_id, e);
                None
            }
        };

        // Post-increment value when we have one, otherwise our best guess.
        let current_amount = store_total
            .or(cached_total)
            .or_else(|| campaign.as_ref().map(|c| c.current_amount + donation.amount))
            .unwrap_or(donation.amount);

        let donation_count = match self.donations.count_completed_donations(campaign_id).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Could not count donations of campaign {}: {}", campaign_id, e);
                None
            }
        };

        let stats = CampaignStatsData {
            campaign_id,
            current_amount,
            target_amount: campaign.as_ref().map(|c| c.target_amount),
            donation_count,
            last_donor_name: donation.donor_name.clone(),
        };
        if let Err(e) = self
            .ws
            .send_to_topic(&stats_topic(campaign_id), WsEventType::CampaignStats, stats)
            .await
        {
            warn!("Failed to push stats of campaign {}: {}", campaign_id, e);
        }

        let activity = DonationActivityData {
            campaign_id,
            donation_id: donation.id,
            donor_name: donation.donor_name.clone(),
            amount: donation.amount,
            message: donation.message.clone(),
            text: format!("{} donated {}", donation.donor_name, format_vnd(donation.amount)),
        };
        if let Err(e) = self
            .ws
            .send_to_topic(&activity_topic(campaign_id), WsEventType::DonationActivity, activity)
            .await
        {
            warn!("Failed to push activity of campaign {}: {}", campaign_id, e);
        }
    }

    async fn publish_donation_event(&self, donation: &DonationRecord) -> Result<(), AppError> {
        let event = DonationEvent {
            donation_id: donation.id,
            campaign_id: donation.campaign_id,
            amount: donation.amount,
            donor_name: donation.donor_name.clone(),
            message: donation.message.clone(),
        };
        publish_event(self.bus.as_ref(), topics::DONATION_EVENTS, &donation.id.to_string(), &event).await?;
        Ok(())
    }

    async fn record_failure(&self, donation: &DonationRecord, category: &str, details: &str) {
        let log = ReconciliationLog::new(
            "donation",
            donation.id,
            category,
            Some(donation.amount),
            format!("campaign {}: {}", donation.campaign_id, details),
        );
        if let Err(e) = self.reconciliation.record_reconciliation(&log).await {
            error!("Failed to record reconciliation log for donation {}: {}", donation.id, e);
        }
    }

    fn qr_url(&self, amount: i64, payment_code: &str, title: &str) -> Result<String, url::ParseError> {
        let mut url = Url::parse(VIETQR_BASE_URL)?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push("image")
            .push(&format!("{}-{}-compact.png", self.bank_id, self.account_no));

        let add_info = format!("{} {}", payment_code, title);
        url.query_pairs_mut()
            .append_pair("amount", &amount.to_string())
            .append_pair("addInfo", &add_info);
        Ok(url.into())
    }
}

/// Consumer of `donation-events`: credits the ledger, then settles.
///
/// Replays are harmless: the ledger deduplicates on the `donation:<id>`
/// reference and the settlement on its idempotency marker.
pub struct DonationEventHandler {
    ledger: Ledger,
    donations: DonationService,
}

impl DonationEventHandler {
    pub fn new(ledger: Ledger, donations: DonationService) -> Self {
        Self { ledger, donations }
    }
}

#[async_trait]
impl MessageHandler for DonationEventHandler {
    fn name(&self) -> &'static str {
        "donation-ledger"
    }

    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        let event: DonationEvent = serde_json::from_value(message.payload.clone())
            .map_err(|e| HandlerError::Permanent(format!("malformed donation event: {}", e)))?;

        let wallet = self.ledger.get_wallet_by_campaign(event.campaign_id).await?;

        let entry = self
            .ledger
            .append_transaction(AppendRequest {
                wallet_id: wallet.id,
                amount: event.amount,
                tx_type: TransactionType::Deposit,
                description: format!("Donation from {}", event.donor_name),
                reference: Some(format!("donation:{}", event.donation_id)),
            })
            .await?;

        self.donations
            .settle_by_external_callback(DonationCompleteRequest {
                donation_id: event.donation_id,
                campaign_id: event.campaign_id,
                amount: event.amount,
                transaction_hash: entry.hash,
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::bus::consumer::{spawn_consumer, ConsumerPolicy, RetryPolicy};
    use crate::db::{LedgerStore, WalletStatus};
    use crate::test_support::{FailingBus, FailingCache, Fixture};

    fn init(campaign_id: Uuid, amount: i64) -> InitDonationRequest {
        InitDonationRequest {
            campaign_id,
            amount,
            donor_name: Some("Lan".to_string()),
            donor_email: None,
            message: Some("Good luck".to_string()),
        }
    }

    fn webhook(code: &str, amount: i64) -> PaymentWebhookRequest {
        PaymentWebhookRequest {
            content: format!("MBVCB.123 {} Flood relief", code),
            transfer_amount: amount,
            gateway: Some("MBBank".to_string()),
            reference_code: Some("FT1".to_string()),
        }
    }

    fn callback(donation: &DonationRecord) -> DonationCompleteRequest {
        DonationCompleteRequest {
            donation_id: donation.id,
            campaign_id: donation.campaign_id,
            amount: donation.amount,
            transaction_hash: "ab".repeat(32),
        }
    }

    #[test]
    fn test_payment_code_shape() {
        let code = generate_payment_code();
        assert_eq!(code.len(), 25);
        assert!(code.starts_with("TS"));
        assert_eq!(extract_payment_code(&format!("CK {} ung ho", code)), Some(code.as_str()));
        assert_eq!(extract_payment_code("TS123 no code here"), None);
    }

    #[tokio::test]
    async fn test_qr_link_escapes_campaign_title() {
        let fx = Fixture::new();
        let service = fx.donation_service();

        let url = service.qr_url(50_000, "TS1", "L\u{169} l\u{1ee5}t & m\u{1b0}a #2").unwrap();

        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path(), "/image/970422-0962974546-compact.png");
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("amount".to_string(), "50000".to_string()),
                ("addInfo".to_string(), "TS1 L\u{169} l\u{1ee5}t & m\u{1b0}a #2".to_string()),
            ]
        );
        assert!(parsed.fragment().is_none());
    }

    #[tokio::test]
    async fn test_init_clamps_to_remaining_need() {
        let fx = Fixture::new();
        let campaign = fx.active_campaign(1_000_000, 900_000).await;

        let result = fx.donation_service().initialize_donation(init(campaign.id, 500_000)).await.unwrap();

        assert_eq!(result.donation.amount, 100_000);
        assert_eq!(result.requested_amount, 500_000);
        assert_eq!(result.donation.status, DonationStatus::Pending);
        assert!(result.qr_url.starts_with("https://img.vietqr.io/image/970422-0962974546-compact.png?amount=100000"));
        assert!(result.qr_url.contains(&result.donation.payment_code));
    }

    #[tokio::test]
    async fn test_init_rejections() {
        let fx = Fixture::new();
        let service = fx.donation_service();

        let err = service.initialize_donation(init(Uuid::new_v4(), 1_000)).await.unwrap_err();
        assert_eq!(err.code(), "CAMPAIGN_NOT_FOUND");

        let full = fx.active_campaign(1_000, 1_000).await;
        let err = service.initialize_donation(init(full.id, 1_000)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_DONATION_AMOUNT");

        let pending = fx.insert_campaign(CampaignStatus::Pending, 1_000, 0).await;
        let err = service.initialize_donation(init(pending.id, 1_000)).await.unwrap_err();
        assert_eq!(err.code(), "CAMPAIGN_NOT_ACTIVE");
    }

    #[tokio::test]
    async fn test_webhook_amount_mismatch_keeps_donation_pending() {
        let fx = Fixture::new();
        let service = fx.donation_service();
        let campaign = fx.active_campaign(1_000_000, 0).await;
        let donation = service.initialize_donation(init(campaign.id, 100_000)).await.unwrap().donation;

        let err = service
            .settle_by_webhook(webhook(&donation.payment_code, 90_000))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "INVALID_DONATION_AMOUNT");
        assert_eq!(service.get_donation(donation.id).await.unwrap().status, DonationStatus::Pending);
        assert!(fx.bus.published(topics::DONATION_EVENTS).is_empty());
    }

    #[tokio::test]
    async fn test_webhook_without_code_or_donation() {
        let fx = Fixture::new();
        let service = fx.donation_service();

        let err = service.settle_by_webhook(webhook("no-code", 1)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_PAYMENT_REFERENCE");

        let err = service
            .settle_by_webhook(webhook("TS1733660000000AB12CD34EF", 1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DONATION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_webhook_replay_is_noop() {
        let fx = Fixture::new();
        let service = fx.donation_service();
        let campaign = fx.active_campaign(1_000_000, 0).await;
        let donation = service.initialize_donation(init(campaign.id, 100_000)).await.unwrap().donation;

        let first = service.settle_by_webhook(webhook(&donation.payment_code, 100_000)).await.unwrap();
        let second = service.settle_by_webhook(webhook(&donation.payment_code, 100_000)).await.unwrap();

        assert_eq!(first, WebhookOutcome::Accepted(donation.id));
        assert_eq!(second, WebhookOutcome::AlreadyCompleted(donation.id));
        assert_eq!(fx.bus.published(topics::DONATION_EVENTS).len(), 1);
        assert_eq!(service.get_donation(donation.id).await.unwrap().status, DonationStatus::Completed);
    }

    #[tokio::test]
    async fn test_webhook_bus_outage_leaves_donation_pending() {
        let mut fx = Fixture::new();
        fx.publisher = Arc::new(FailingBus);
        let service = fx.donation_service();
        let campaign = fx.active_campaign(1_000_000, 0).await;
        let donation = service.initialize_donation(init(campaign.id, 100_000)).await.unwrap().donation;

        let err = service
            .settle_by_webhook(webhook(&donation.payment_code, 100_000))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "BUS_ERROR");
        assert_eq!(service.get_donation(donation.id).await.unwrap().status, DonationStatus::Pending);
    }

    #[tokio::test]
    async fn test_callback_replay_is_noop() {
        let fx = Fixture::new();
        let service = fx.donation_service();
        let campaign = fx.active_campaign(1_000_000, 0).await;
        let donation = service.initialize_donation(init(campaign.id, 100_000)).await.unwrap().donation;

        let first = service.settle_by_external_callback(callback(&donation)).await.unwrap();
        let second = service.settle_by_external_callback(callback(&donation)).await.unwrap();

        assert_eq!(first, SettlementOutcome::Settled);
        assert_eq!(second, SettlementOutcome::AlreadyProcessed);

        let campaign = fx.store.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(campaign.current_amount, 100_000);

        let settled = service.get_donation(donation.id).await.unwrap();
        assert_eq!(settled.status, DonationStatus::Completed);
        assert_eq!(settled.external_ref, Some("ab".repeat(32)));
    }

    #[tokio::test]
    async fn test_callback_rejects_mismatched_settlement() {
        let fx = Fixture::new();
        let service = fx.donation_service();
        let campaign = fx.active_campaign(1_000_000, 0).await;
        let donation = service.initialize_donation(init(campaign.id, 100_000)).await.unwrap().donation;

        let mut request = callback(&donation);
        request.amount = 1;
        let err = service.settle_by_external_callback(request).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_DONATION_AMOUNT");

        // The rejected attempt left no marker behind.
        let outcome = service.settle_by_external_callback(callback(&donation)).await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Settled);
    }

    #[tokio::test]
    async fn test_settlement_never_creates_cache_entry() {
        let fx = Fixture::new();
        let service = fx.donation_service();
        let campaign = fx.active_campaign(1_000_000, 0).await;
        let donation = service.initialize_donation(init(campaign.id, 100_000)).await.unwrap().donation;

        service.settle_by_external_callback(callback(&donation)).await.unwrap();

        assert_eq!(fx.cache.len(), 0);
    }

    #[tokio::test]
    async fn test_settlement_updates_existing_cache_entry() {
        let fx = Fixture::new();
        let service = fx.donation_service();
        let campaign = fx.active_campaign(1_000_000, 0).await;
        fx.cache.set_amount(campaign.id, 0).await.unwrap();
        let donation = service.initialize_donation(init(campaign.id, 100_000)).await.unwrap().donation;

        service.settle_by_external_callback(callback(&donation)).await.unwrap();

        assert_eq!(fx.cache.get_amount(campaign.id).await.unwrap(), Some(100_000));
    }

    #[tokio::test]
    async fn test_fan_out_failures_do_not_undo_settlement() {
        let mut fx = Fixture::new().with_failing_increments();
        fx.cache_backend = Arc::new(FailingCache);
        let service = fx.donation_service();
        let campaign = fx.active_campaign(1_000_000, 200_000).await;
        let donation = service.initialize_donation(init(campaign.id, 100_000)).await.unwrap().donation;
        let mut stats = fx.ws.register(stats_topic(campaign.id)).await;
        let mut activity = fx.ws.register(activity_topic(campaign.id)).await;

        let outcome = service.settle_by_external_callback(callback(&donation)).await.unwrap();

        assert_eq!(outcome, SettlementOutcome::Settled);
        assert_eq!(service.get_donation(donation.id).await.unwrap().status, DonationStatus::Completed);

        let categories: Vec<String> = fx
            .store
            .list_reconciliation_logs(10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.category)
            .collect();
        assert!(categories.contains(&"READ_MODEL_UPDATE_FAILED".to_string()));
        assert!(categories.contains(&"CACHE_UPDATE_FAILED".to_string()));

        // Falls back to the stored total plus this donation.
        let pushed: serde_json::Value = serde_json::from_str(&stats.recv().await.unwrap()).unwrap();
        assert_eq!(pushed["event"], "campaign_stats");
        assert_eq!(pushed["data"]["currentAmount"], 300_000);
        assert_eq!(pushed["data"]["donationCount"], 1);

        let pushed: serde_json::Value = serde_json::from_str(&activity.recv().await.unwrap()).unwrap();
        assert_eq!(pushed["data"]["text"], "Lan donated 100,000 VND");
    }

    #[tokio::test]
    async fn test_webhook_to_ledger_loop() {
        let fx = Fixture::new();
        let service = fx.donation_service();
        let campaign = fx.active_campaign(1_000_000, 0).await;
        let donation = service.initialize_donation(init(campaign.id, 100_000)).await.unwrap().donation;

        let policy = ConsumerPolicy {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                multiplier: 2.0,
                max_backoff: Duration::from_millis(5),
            },
            dead_letters: fx.stores.dead_letters.clone(),
        };
        let handler = Arc::new(DonationEventHandler::new(fx.ledger.clone(), service.clone()));
        spawn_consumer(&fx.bus, topics::DONATION_EVENTS, handler, policy).unwrap();

        service.settle_by_webhook(webhook(&donation.payment_code, 100_000)).await.unwrap();

        let mut settled = None;
        for _ in 0..200 {
            let current = service.get_donation(donation.id).await.unwrap();
            if current.external_ref.is_some() {
                settled = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let settled = settled.expect("donation settled through the ledger");

        let wallet = fx.store.get_wallet_by_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(wallet.balance, 100_000);
        let entries = fx.store.list_entries(wallet.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(settled.external_ref.as_deref(), Some(entries[0].hash.as_str()));
        assert_eq!(fx.store.get_campaign(campaign.id).await.unwrap().unwrap().current_amount, 100_000);
    }

    #[tokio::test]
    async fn test_sweep_redelivers_completed_but_unsettled_donation() {
        let fx = Fixture::new();
        let service = fx.donation_service();
        let campaign = fx.active_campaign(1_000_000, 0).await;
        let donation = service.initialize_donation(init(campaign.id, 100_000)).await.unwrap().donation;

        // No consumer yet: the event is queued nowhere and the process "restarts".
        service.settle_by_webhook(webhook(&donation.payment_code, 100_000)).await.unwrap();
        let replay = service.settle_by_webhook(webhook(&donation.payment_code, 100_000)).await.unwrap();
        assert!(matches!(replay, WebhookOutcome::AlreadyCompleted(_)));
        let stranded = service.get_donation(donation.id).await.unwrap();
        assert_eq!(stranded.status, DonationStatus::Completed);
        assert!(stranded.external_ref.is_none());

        // Still inside the grace period.
        assert_eq!(service.redeliver_unsettled(Duration::from_secs(3600)).await.unwrap(), 0);

        let policy = ConsumerPolicy {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                multiplier: 2.0,
                max_backoff: Duration::from_millis(5),
            },
            dead_letters: fx.stores.dead_letters.clone(),
        };
        let handler = Arc::new(DonationEventHandler::new(fx.ledger.clone(), service.clone()));
        spawn_consumer(&fx.bus, topics::DONATION_EVENTS, handler, policy).unwrap();

        assert_eq!(service.redeliver_unsettled(Duration::ZERO).await.unwrap(), 1);
        assert_eq!(fx.bus.published(topics::DONATION_EVENTS).len(), 2);

        let mut settled = false;
        for _ in 0..200 {
            if service.get_donation(donation.id).await.unwrap().external_ref.is_some() {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled, "swept donation settled through the ledger");

        let wallet = fx.store.get_wallet_by_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(wallet.balance, 100_000);
        assert_eq!(service.redeliver_unsettled(Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handler_dead_letters_locked_wallet() {
        let fx = Fixture::new();
        let service = fx.donation_service();
        let campaign = fx.active_campaign(1_000_000, 0).await;
        let wallet = fx.ledger.get_wallet_by_campaign(campaign.id).await.unwrap();
        fx.ledger.lock_wallet(wallet.id).await.unwrap();
        assert_eq!(fx.ledger.get_wallet(wallet.id).await.unwrap().status, WalletStatus::Locked);

        let handler = DonationEventHandler::new(fx.ledger.clone(), service);
        let event = DonationEvent {
            donation_id: Uuid::new_v4(),
            campaign_id: campaign.id,
            amount: 1_000,
            donor_name: "Lan".to_string(),
            message: None,
        };
        let message = BusMessage {
            id: Uuid::new_v4(),
            topic: topics::DONATION_EVENTS.to_string(),
            key: event.donation_id.to_string(),
            payload: serde_json::to_value(&event).unwrap(),
            published_at: Utc::now(),
        };

        let result = handler.handle(&message).await;
        assert!(matches!(result, Err(HandlerError::Permanent(_))));
    }
}
