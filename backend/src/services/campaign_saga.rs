//! # Campaign Creation Saga
//!
//! Creates a campaign together with its ledger wallet. The two live in
//! different stores, so creation runs as a saga with a compensation step
//! instead of one transaction.
//!
//! ## Saga Steps
//!
//! ```text
//! DRAFT
//!   │ 1. identity service: is the owner KYC-verified?   ── no ──► ELIGIBILITY_FAILED
//!   ▼
//! PENDING   (2. campaign persisted, commit point 1)
//!   │ 3. ledger: ensure_wallet(campaign)                 ── fail/timeout ──┐
//!   ▼                                                                      ▼
//! ACTIVE    (4. conditional PENDING → ACTIVE, commit point 2)    compensation:
//!   │ 5. contract-sign-request (best-effort, once)               delete campaign,
//!   ▼                                                            lock a late wallet,
//! done                                                           reconciliation log,
//!                                                                CAMPAIGN_CREATION_FAILED
//! ```
//!
//! Steps 3-5 are idempotent. A campaign left PENDING (crash, activation
//! failure) is picked up by [`CampaignService::start_recovery_loop`],
//! which runs them again through [`CampaignService::resume_campaign`].
//!
//! Every remote call is bounded by `collaborator_timeout`; a timeout is a
//! failure of that step.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::events::ContractSignRequest;
use crate::bus::{publish_event, topics, EventBus};
use crate::cache::CampaignCache;
use crate::clients::IdentityClient;
use crate::config::AppConfig;
use crate::db::{
    CampaignRecord, CampaignStatus, CampaignStore, IdempotencyStore, ReconciliationLog, ReconciliationStore,
    Stores, WalletRecord,
};
use crate::errors::AppError;
use crate::models::CreateCampaignRequest;
use crate::services::ledger::Ledger;

/// How many stale PENDING campaigns one recovery pass picks up.
const RECOVERY_BATCH: i64 = 100;

/// A campaign with its wallet, as returned by the read path.
#[derive(Debug, Clone)]
pub struct CampaignDetails {
    pub campaign: CampaignRecord,
    pub wallet: Option<WalletRecord>,
}

/// Owner of the campaign lifecycle.
#[derive(Clone)]
pub struct CampaignService {
    campaigns: Arc<dyn CampaignStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    reconciliation: Arc<dyn ReconciliationStore>,
    ledger: Ledger,
    identity: Arc<dyn IdentityClient>,
    bus: Arc<dyn EventBus>,
    cache: Arc<dyn CampaignCache>,
    collaborator_timeout: Duration,
    currency: String,
}

impl CampaignService {
    pub fn new(
        stores: &Stores,
        ledger: Ledger,
        identity: Arc<dyn IdentityClient>,
        bus: Arc<dyn EventBus>,
        cache: Arc<dyn CampaignCache>,
        config: &AppConfig,
    ) -> Self {
        Self {
            campaigns: stores.campaigns.clone(),
            idempotency: stores.idempotency.clone(),
            reconciliation: stores.reconciliation.clone(),
            ledger,
            identity,
            bus,
            cache,
            collaborator_timeout: config.collaborator_timeout,
            currency: config.currency.clone(),
        }
    }

    /// Run the creation saga.
    ///
    /// ## Returns
    ///
    /// * `Ok(CampaignRecord)` - the campaign, ACTIVE with a wallet
    /// * `Err(EligibilityFailed)` - owner is not KYC-verified; nothing was written
    /// * `Err(CampaignCreationFailed)` - wallet provisioning failed; the campaign was rolled back
    pub async fn create_campaign(&self, request: CreateCampaignRequest) -> Result<CampaignRecord, AppError> {
        validate_request(&request)?;

        // Step 1: eligibility
        self.check_eligibility(&request.owner_id).await?;

        // Step 2: persist PENDING
        let now = Utc::now();
        let campaign = CampaignRecord {
            id: Uuid::new_v4(),
            owner_id: request.owner_id,
            title: request.title.trim().to_string(),
            description: request.description,
            target_amount: request.target_amount,
            current_amount: 0,
            currency: self.currency.clone(),
            status: CampaignStatus::Pending,
            start_date: request.start_date,
            end_date: request.end_date,
            has_used_quick_withdrawal: false,
            like_count: 0,
            view_count: 0,
            comment_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.campaigns.insert_campaign(&campaign).await?;

        info!("Campaign {} persisted as PENDING (owner {})", campaign.id, campaign.owner_id);

        // Steps 3-5
        self.provision(campaign).await
    }

    /// Run steps 3-5 again for a campaign left behind.
    ///
    /// ACTIVE campaigns only get the (deduplicated) contract request; a
    /// PENDING campaign is provisioned and activated.
    pub async fn resume_campaign(&self, campaign_id: Uuid) -> Result<CampaignRecord, AppError> {
        let campaign = self.load(campaign_id).await?;

        match campaign.status {
            CampaignStatus::Pending => self.provision(campaign).await,
            CampaignStatus::Active => {
                self.request_contract(&campaign).await;
                Ok(campaign)
            }
            status => Err(AppError::InvalidStatus(format!(
                "campaign {} is {}, nothing to resume",
                campaign_id, status
            ))),
        }
    }

    /// Campaign with its wallet.
    ///
    /// `current_amount` comes from the amount cache when it has the entry;
    /// on a miss the store value is used and written to the cache.
    pub async fn get_campaign(&self, campaign_id: Uuid) -> Result<CampaignDetails, AppError> {
        let mut campaign = self.load(campaign_id).await?;

        match self.cache.get_amount(campaign_id).await {
            Ok(Some(amount)) => campaign.current_amount = amount,
            Ok(None) => {
                if let Err(e) = self.cache.set_amount(campaign_id, campaign.current_amount).await {
                    warn!("Failed to fill amount cache for campaign {}: {}", campaign_id, e);
                }
            }
            Err(e) => warn!("Amount cache read failed for campaign {}: {}", campaign_id, e),
        }

        let wallet = match self.ledger.get_wallet_by_campaign(campaign_id).await {
            Ok(wallet) => Some(wallet),
            Err(AppError::WalletNotFound(_)) => None,
            Err(e) => return Err(e),
        };

        Ok(CampaignDetails { campaign, wallet })
    }

    pub async fn list_campaigns(&self, limit: i64, offset: i64) -> Result<Vec<CampaignRecord>, AppError> {
        Ok(self.campaigns.list_campaigns(limit, offset).await?)
    }

    /// ACTIVE → CLOSED, then lock the wallet so no more money moves.
    pub async fn close_campaign(&self, campaign_id: Uuid) -> Result<CampaignRecord, AppError> {
        let campaign = self.load(campaign_id).await?;

        match campaign.status {
            CampaignStatus::Closed => return Err(AppError::CampaignAlreadyClosed(campaign_id)),
            CampaignStatus::Active => {}
            status => {
                return Err(AppError::InvalidStatus(format!(
                    "campaign {} is {} and cannot be closed",
                    campaign_id, status
                )))
            }
        }

        if !self
            .campaigns
            .update_campaign_status(campaign_id, CampaignStatus::Active, CampaignStatus::Closed)
            .await?
        {
            // Lost a race with another close.
            return Err(AppError::CampaignAlreadyClosed(campaign_id));
        }

        match self.ledger.get_wallet_by_campaign(campaign_id).await {
            Ok(wallet) => {
                self.ledger.lock_wallet(wallet.id).await?;
            }
            Err(AppError::WalletNotFound(_)) => {
                warn!("Closed campaign {} has no wallet to lock", campaign_id);
            }
            Err(e) => return Err(e),
        }

        info!("🔒 Campaign {} closed", campaign_id);
        self.load(campaign_id).await
    }

    /// Periodically resume PENDING campaigns older than one interval.
    ///
    /// Spawn it as a background task:
    ///
    /// ```rust,ignore
    /// tokio::spawn(async move { campaigns.start_recovery_loop(300).await });
    /// ```
    pub async fn start_recovery_loop(&self, interval_secs: u64) {
        info!("Starting saga recovery loop (interval: {}s)", interval_secs);

        let stale_after = Duration::from_secs(interval_secs);
        let mut ticker = interval(stale_after);

        loop {
            ticker.tick().await;

            match self.recover_stale_campaigns(stale_after).await {
                Ok(0) => debug!("No stale PENDING campaigns"),
                Ok(n) => info!("Saga recovery resumed {} campaigns", n),
                Err(e) => error!("Saga recovery pass failed: {}", e),
            }
        }
    }

    /// Resume every PENDING campaign not touched for `stale_after`.
    ///
    /// Returns how many campaigns were looked at. Failures of individual
    /// campaigns are logged and do not stop the pass.
    pub async fn recover_stale_campaigns(&self, stale_after: Duration) -> Result<usize, AppError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::zero());

        let stale: Vec<CampaignRecord> = self
            .campaigns
            .list_campaigns_by_status(CampaignStatus::Pending, RECOVERY_BATCH)
            .await?
            .into_iter()
            .filter(|c| c.updated_at <= cutoff)
            .collect();

        for campaign in &stale {
            info!("Resuming stale PENDING campaign {}", campaign.id);
            if let Err(e) = self.resume_campaign(campaign.id).await {
                warn!("Could not resume campaign {}: {}", campaign.id, e);
            }
        }

        Ok(stale.len())
    }

    // ==========================================
    // SAGA STEPS
    // ==========================================

    async fn check_eligibility(&self, owner_id: &str) -> Result<(), AppError> {
        match self.bounded(self.identity.check_kyc_valid(owner_id)).await {
            Some(Ok(validity)) if validity.is_valid => Ok(()),
            Some(Ok(validity)) => {
                let reason = validity
                    .message
                    .or(validity.status)
                    .unwrap_or_else(|| "KYC not verified".to_string());
                info!("Owner {} is not eligible: {}", owner_id, reason);
                Err(AppError::EligibilityFailed(reason))
            }
            Some(Err(e)) => {
                warn!("Eligibility check for {} failed: {}", owner_id, e);
                Err(AppError::EligibilityFailed(format!("identity service error: {}", e)))
            }
            None => {
                warn!("Eligibility check for {} timed out", owner_id);
                Err(AppError::EligibilityFailed("identity service timed out".to_string()))
            }
        }
    }

    /// Steps 3-5 for a PENDING campaign.
    async fn provision(&self, campaign: CampaignRecord) -> Result<CampaignRecord, AppError> {
        // Step 3: wallet
        match self.bounded(self.ledger.ensure_wallet(campaign.id, &campaign.currency)).await {
            Some(Ok(wallet)) => {
                info!("Wallet {} ready for campaign {}", wallet.id, campaign.id);
            }
            Some(Err(e)) => return Err(self.compensate(&campaign, e.to_string()).await),
            None => {
                let reason = format!("wallet provisioning timed out after {:?}", self.collaborator_timeout);
                return Err(self.compensate(&campaign, reason).await);
            }
        }

        // Step 4: activate
        let activated = self
            .campaigns
            .update_campaign_status(campaign.id, CampaignStatus::Pending, CampaignStatus::Active)
            .await?;

        let campaign = self.load(campaign.id).await?;
        if !activated && campaign.status != CampaignStatus::Active {
            return Err(AppError::InvalidStatus(format!(
                "campaign {} moved to {} during provisioning",
                campaign.id, campaign.status
            )));
        }

        info!("✅ Campaign {} is ACTIVE", campaign.id);

        // Step 5: contract
        self.request_contract(&campaign).await;

        Ok(campaign)
    }

    /// Roll back a campaign whose wallet could not be provisioned.
    ///
    /// Always returns the error to surface; a failed rollback is recorded
    /// for manual reconciliation instead.
    async fn compensate(&self, campaign: &CampaignRecord, reason: String) -> AppError {
        error!("Wallet provisioning failed for campaign {}, rolling back: {}", campaign.id, reason);

        let (mut category, mut details) = match self.bounded(self.campaigns.delete_campaign(campaign.id)).await {
            Some(Ok(_)) => {
                info!("Campaign {} rolled back", campaign.id);
                // A read during the saga may have cached the total.
                if let Err(e) = self.cache.invalidate(campaign.id).await {
                    warn!("Failed to drop cached total of campaign {}: {}", campaign.id, e);
                }
                ("CAMPAIGN_CREATION_FAILED", reason.clone())
            }
            Some(Err(e)) => {
                error!("🚨 Compensation failed for campaign {}: {}", campaign.id, e);
                ("COMPENSATION_FAILED", format!("{}; delete failed: {}", reason, e))
            }
            None => {
                error!("🚨 Compensation timed out for campaign {}", campaign.id);
                ("COMPENSATION_FAILED", format!("{}; delete timed out", reason))
            }
        };

        if let Some(problem) = self.lock_orphan_wallet(campaign.id).await {
            category = "COMPENSATION_FAILED";
            details = format!("{}; {}", details, problem);
        }

        let log = ReconciliationLog::new("campaign", campaign.id, category, Some(campaign.target_amount), details);
        if let Err(e) = self.reconciliation.record_reconciliation(&log).await {
            error!("Failed to record reconciliation log for campaign {}: {}", campaign.id, e);
        }

        AppError::CampaignCreationFailed(reason)
    }

    /// A wallet insert that timed out on our side may still have committed.
    /// Lock such a wallet so nothing moves through it. Returns what went
    /// wrong when the wallet could not be ruled out or locked.
    async fn lock_orphan_wallet(&self, campaign_id: Uuid) -> Option<String> {
        let wallet = match self.bounded(self.ledger.get_wallet_by_campaign(campaign_id)).await {
            Some(Ok(wallet)) => wallet,
            Some(Err(AppError::WalletNotFound(_))) => return None,
            Some(Err(e)) => return Some(format!("orphan wallet lookup failed: {}", e)),
            None => return Some("orphan wallet lookup timed out".to_string()),
        };

        warn!("Campaign {} rolled back but wallet {} was created, locking it", campaign_id, wallet.id);
        match self.bounded(self.ledger.lock_wallet(wallet.id)).await {
            Some(Ok(_)) => None,
            Some(Err(e)) => Some(format!("orphan wallet {} not locked: {}", wallet.id, e)),
            None => Some(format!("locking orphan wallet {} timed out", wallet.id)),
        }
    }

    /// Publish the contract request once per campaign. Never fails the caller.
    async fn request_contract(&self, campaign: &CampaignRecord) {
        let marker = format!("contract-sign:{}", campaign.id);

        match self.idempotency.is_processed(&marker).await {
            Ok(true) => {
                debug!("Contract already requested for campaign {}", campaign.id);
                return;
            }
            Ok(false) => {}
            Err(e) => warn!("Could not check contract marker for campaign {}: {}", campaign.id, e),
        }

        let profile = match self.bounded(self.identity.get_kyc_profile(&campaign.owner_id)).await {
            Some(Ok(profile)) => Some(profile),
            Some(Err(e)) => {
                warn!("KYC profile lookup for {} failed: {}", campaign.owner_id, e);
                None
            }
            None => {
                warn!("KYC profile lookup for {} timed out", campaign.owner_id);
                None
            }
        };

        let event = ContractSignRequest {
            campaign_id: campaign.id,
            campaign_name: campaign.title.clone(),
            target_amount: campaign.target_amount,
            currency: campaign.currency.clone(),
            start_date: campaign.start_date,
            end_date: campaign.end_date,
            organizer_id: campaign.owner_id.clone(),
            organizer_name: profile.as_ref().and_then(|p| p.full_name.clone()),
            organizer_id_number: profile.and_then(|p| p.id_number),
        };

        match publish_event(self.bus.as_ref(), topics::CONTRACT_SIGN_REQUEST, &campaign.id.to_string(), &event).await {
            Ok(_) => {
                info!("📝 Contract requested for campaign {}", campaign.id);
                if let Err(e) = self.idempotency.mark_processed(&marker).await {
                    warn!("Failed to mark contract request for campaign {}: {}", campaign.id, e);
                }
            }
            Err(e) => warn!("Failed to publish contract request for campaign {}: {}", campaign.id, e),
        }
    }

    // ==========================================
    // HELPERS
    // ==========================================

    async fn load(&self, campaign_id: Uuid) -> Result<CampaignRecord, AppError> {
        self.campaigns
            .get_campaign(campaign_id)
            .await?
            .ok_or(AppError::CampaignNotFound(campaign_id))
    }

    /// Run `fut` under the collaborator timeout. `None` means it timed out.
    async fn bounded<F: Future>(&self, fut: F) -> Option<F::Output> {
        timeout(self.collaborator_timeout, fut).await.ok()
    }
}

fn validate_request(request: &CreateCampaignRequest) -> Result<(), AppError> {
    if request.owner_id.trim().is_empty() {
        return Err(AppError::Validation("ownerId is required".to_string()));
    }
    if request.title.trim().is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    if request.target_amount <= 0 {
        return Err(AppError::Validation("targetAmount must be greater than 0".to_string()));
    }
    if let (Some(start), Some(end)) = (request.start_date, request.end_date) {
        if end < start {
            return Err(AppError::Validation("endDate is before startDate".to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CampaignStore, LedgerStore, WalletStatus};
    use crate::test_support::{Fixture, FailingBus, StubIdentity, WalletFault};

    fn request(owner: &str) -> CreateCampaignRequest {
        CreateCampaignRequest {
            owner_id: owner.to_string(),
            title: "Flood relief".to_string(),
            description: "Rebuild homes".to_string(),
            target_amount: 1_000_000,
            start_date: None,
            end_date: None,
        }
    }

    #[tokio::test]
    async fn test_create_campaign_activates_and_requests_contract() {
        let fx = Fixture::new();
        let service = fx.campaign_service(Arc::new(StubIdentity::eligible()));

        let campaign = service.create_campaign(request("owner-1")).await.unwrap();

        assert_eq!(campaign.status, CampaignStatus::Active);
        assert!(fx.store.get_wallet_by_campaign(campaign.id).await.unwrap().is_some());

        let published = fx.bus.published(topics::CONTRACT_SIGN_REQUEST);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload["organizerName"], "Nguyen Van A");
        assert_eq!(published[0].payload["campaignName"], "Flood relief");
    }

    #[tokio::test]
    async fn test_ineligible_owner_writes_nothing() {
        let fx = Fixture::new();
        let service = fx.campaign_service(Arc::new(StubIdentity::ineligible()));

        let err = service.create_campaign(request("owner-1")).await.unwrap_err();

        assert_eq!(err.code(), "ELIGIBILITY_FAILED");
        assert!(fx.store.list_campaigns(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_identity_outage_counts_as_ineligible() {
        let fx = Fixture::new();
        let service = fx.campaign_service(Arc::new(StubIdentity::unavailable()));

        let err = service.create_campaign(request("owner-1")).await.unwrap_err();
        assert_eq!(err.code(), "ELIGIBILITY_FAILED");
    }

    #[tokio::test]
    async fn test_wallet_failure_rolls_campaign_back() {
        let fx = Fixture::new().with_wallet_fault(WalletFault::Reject);
        let service = fx.campaign_service(Arc::new(StubIdentity::eligible()));

        let err = service.create_campaign(request("owner-1")).await.unwrap_err();

        assert_eq!(err.code(), "CAMPAIGN_CREATION_FAILED");
        assert!(fx.store.list_campaigns(10, 0).await.unwrap().is_empty());

        let logs = fx.store.list_reconciliation_logs(10, 0).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].category, "CAMPAIGN_CREATION_FAILED");
        assert!(fx.bus.published(topics::CONTRACT_SIGN_REQUEST).is_empty());
    }

    #[tokio::test]
    async fn test_wallet_timeout_rolls_campaign_back() {
        let fx = Fixture::new().with_wallet_fault(WalletFault::Hang);
        let service = fx.campaign_service(Arc::new(StubIdentity::eligible()));

        let err = service.create_campaign(request("owner-1")).await.unwrap_err();

        assert_eq!(err.code(), "CAMPAIGN_CREATION_FAILED");
        assert!(err.to_string().contains("timed out"));
        assert!(fx.store.list_campaigns(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_late_wallet_commit_is_locked_on_rollback() {
        let fx = Fixture::new().with_wallet_fault(WalletFault::CommitThenHang);
        let service = fx.campaign_service(Arc::new(StubIdentity::eligible()));

        let err = service.create_campaign(request("owner-1")).await.unwrap_err();

        assert_eq!(err.code(), "CAMPAIGN_CREATION_FAILED");
        assert!(fx.store.list_campaigns(10, 0).await.unwrap().is_empty());

        let wallets = fx.store.list_wallets(10, 0).await.unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].status, WalletStatus::Locked);

        let logs = fx.store.list_reconciliation_logs(10, 0).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].category, "CAMPAIGN_CREATION_FAILED");
    }

    #[tokio::test]
    async fn test_bus_outage_does_not_fail_creation() {
        let mut fx = Fixture::new();
        fx.publisher = Arc::new(FailingBus);
        let service = fx.campaign_service(Arc::new(StubIdentity::eligible()));

        let campaign = service.create_campaign(request("owner-1")).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Active);
    }

    #[tokio::test]
    async fn test_resume_is_idempotent() {
        let fx = Fixture::new();
        let service = fx.campaign_service(Arc::new(StubIdentity::eligible()));
        let campaign = service.create_campaign(request("owner-1")).await.unwrap();

        let resumed = service.resume_campaign(campaign.id).await.unwrap();
        service.resume_campaign(campaign.id).await.unwrap();

        assert_eq!(resumed.status, CampaignStatus::Active);
        assert_eq!(fx.store.list_wallets(10, 0).await.unwrap().len(), 1);
        assert_eq!(fx.bus.published(topics::CONTRACT_SIGN_REQUEST).len(), 1);
    }

    #[tokio::test]
    async fn test_recovery_activates_stale_pending_campaign() {
        let fx = Fixture::new();
        let service = fx.campaign_service(Arc::new(StubIdentity::eligible()));
        let pending = fx.insert_campaign(CampaignStatus::Pending, 500_000, 0).await;

        let resumed = service.recover_stale_campaigns(Duration::ZERO).await.unwrap();

        assert_eq!(resumed, 1);
        let campaign = fx.store.get_campaign(pending.id).await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Active);
        assert!(fx.store.get_wallet_by_campaign(pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_close_locks_wallet_once() {
        let fx = Fixture::new();
        let service = fx.campaign_service(Arc::new(StubIdentity::eligible()));
        let campaign = service.create_campaign(request("owner-1")).await.unwrap();

        let closed = service.close_campaign(campaign.id).await.unwrap();
        assert_eq!(closed.status, CampaignStatus::Closed);

        let wallet = fx.store.get_wallet_by_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(wallet.status, crate::db::WalletStatus::Locked);

        let err = service.close_campaign(campaign.id).await.unwrap_err();
        assert_eq!(err.code(), "CAMPAIGN_ALREADY_CLOSED");
    }

    #[tokio::test]
    async fn test_get_campaign_fills_cache() {
        let fx = Fixture::new();
        let service = fx.campaign_service(Arc::new(StubIdentity::eligible()));
        let campaign = fx.active_campaign(1_000_000, 250_000).await;

        let details = service.get_campaign(campaign.id).await.unwrap();

        assert_eq!(details.campaign.current_amount, 250_000);
        assert!(details.wallet.is_some());
        assert_eq!(fx.cache.get_amount(campaign.id).await.unwrap(), Some(250_000));
    }

    #[test]
    fn test_validation_rejects_bad_requests() {
        let mut bad = request("owner-1");
        bad.target_amount = 0;
        assert_eq!(validate_request(&bad).unwrap_err().code(), "VALIDATION_ERROR");

        let mut bad = request(" ");
        bad.title = "t".to_string();
        assert!(validate_request(&bad).is_err());
    }
}
