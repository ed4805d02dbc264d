//! Fixtures shared by the service tests: an in-memory wiring of every
//! service plus stubs that fail in controlled ways.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::bus::{BusError, EventBus, InProcessBus};
use crate::cache::{CacheError, CampaignCache, InMemoryCampaignCache};
use crate::clients::{ClientError, IdentityClient, KycProfile, KycValidity};
use crate::config::AppConfig;
use crate::db::*;
use crate::services::campaign_saga::CampaignService;
use crate::services::donation::DonationService;
use crate::services::ledger::Ledger;
use crate::services::proof::ProofService;
use crate::services::withdrawal::WithdrawalService;
use crate::websocket::WsRegistry;

// ============================================
// IDENTITY
// ============================================

pub struct StubIdentity {
    valid: bool,
    reachable: bool,
    pub profile_calls: AtomicUsize,
}

impl StubIdentity {
    pub fn eligible() -> Self {
        Self { valid: true, reachable: true, profile_calls: AtomicUsize::new(0) }
    }

    pub fn ineligible() -> Self {
        Self { valid: false, reachable: true, profile_calls: AtomicUsize::new(0) }
    }

    pub fn unavailable() -> Self {
        Self { valid: false, reachable: false, profile_calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl IdentityClient for StubIdentity {
    async fn check_kyc_valid(&self, user_id: &str) -> Result<KycValidity, ClientError> {
        if !self.reachable {
            return Err(ClientError::HttpStatus(503));
        }
        Ok(KycValidity {
            is_valid: self.valid,
            status: Some(if self.valid { "APPROVED" } else { "PENDING" }.to_string()),
            message: if self.valid { None } else { Some(format!("KYC of {} not approved", user_id)) },
        })
    }

    async fn get_kyc_profile(&self, user_id: &str) -> Result<KycProfile, ClientError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        Ok(KycProfile {
            user_id: Some(user_id.to_string()),
            full_name: Some("Nguyen Van A".to_string()),
            id_number: Some("079090001234".to_string()),
            status: Some("APPROVED".to_string()),
        })
    }
}

// ============================================
// FAILING COLLABORATORS
// ============================================

/// Bus whose broker is down.
pub struct FailingBus;

#[async_trait]
impl EventBus for FailingBus {
    async fn publish(&self, _topic: &str, _key: &str, _payload: serde_json::Value) -> Result<Uuid, BusError> {
        Err(BusError::Unavailable("broker unreachable".to_string()))
    }
}

/// Cache that is always down.
pub struct FailingCache;

#[async_trait]
impl CampaignCache for FailingCache {
    async fn get_amount(&self, _campaign_id: Uuid) -> Result<Option<i64>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set_amount(&self, _campaign_id: Uuid, _amount: i64) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn increment_if_present(&self, _campaign_id: Uuid, _delta: i64) -> Result<Option<i64>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn invalidate(&self, _campaign_id: Uuid) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

/// How [`FaultyWalletStore`] misbehaves on wallet creation.
#[derive(Debug, Clone, Copy)]
pub enum WalletFault {
    Reject,
    Hang,
    /// The insert commits, but the caller hears back too late.
    CommitThenHang,
}

/// Ledger store whose wallet creation fails; everything else is delegated.
pub struct FaultyWalletStore {
    inner: Arc<MemoryStore>,
    fault: WalletFault,
}

#[async_trait]
impl LedgerStore for FaultyWalletStore {
    async fn insert_wallet(&self, wallet: &WalletRecord) -> Result<(), LedgerWriteError> {
        match self.fault {
            WalletFault::Reject => Err(LedgerWriteError::Database(DatabaseError::ConnectionError(
                "ledger unreachable".to_string(),
            ))),
            WalletFault::Hang => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                self.inner.insert_wallet(wallet).await
            }
            WalletFault::CommitThenHang => {
                self.inner.insert_wallet(wallet).await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        }
    }

    async fn get_wallet(&self, id: Uuid) -> Result<Option<WalletRecord>, DatabaseError> {
        self.inner.get_wallet(id).await
    }

    async fn get_wallet_by_campaign(&self, campaign_id: Uuid) -> Result<Option<WalletRecord>, DatabaseError> {
        self.inner.get_wallet_by_campaign(campaign_id).await
    }

    async fn list_wallets(&self, limit: i64, offset: i64) -> Result<Vec<WalletRecord>, DatabaseError> {
        self.inner.list_wallets(limit, offset).await
    }

    async fn set_wallet_status(&self, id: Uuid, status: WalletStatus) -> Result<bool, DatabaseError> {
        self.inner.set_wallet_status(id, status).await
    }

    async fn chain_tail(&self, wallet_id: Uuid) -> Result<Option<ChainTail>, DatabaseError> {
        self.inner.chain_tail(wallet_id).await
    }

    async fn find_entry_by_reference(
        &self,
        wallet_id: Uuid,
        reference: &str,
    ) -> Result<Option<LedgerEntryRecord>, DatabaseError> {
        self.inner.find_entry_by_reference(wallet_id, reference).await
    }

    async fn append_entry(&self, entry: NewLedgerEntry) -> Result<LedgerEntryRecord, LedgerWriteError> {
        self.inner.append_entry(entry).await
    }

    async fn list_entries(&self, wallet_id: Uuid) -> Result<Vec<LedgerEntryRecord>, DatabaseError> {
        self.inner.list_entries(wallet_id).await
    }

    async fn list_entries_page(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntryRecord>, DatabaseError> {
        self.inner.list_entries_page(wallet_id, limit, offset).await
    }
}

/// Campaign store whose running-total increment fails.
pub struct FailingIncrements {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl CampaignStore for FailingIncrements {
    async fn insert_campaign(&self, campaign: &CampaignRecord) -> Result<(), DatabaseError> {
        self.inner.insert_campaign(campaign).await
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<CampaignRecord>, DatabaseError> {
        self.inner.get_campaign(id).await
    }

    async fn list_campaigns(&self, limit: i64, offset: i64) -> Result<Vec<CampaignRecord>, DatabaseError> {
        self.inner.list_campaigns(limit, offset).await
    }

    async fn list_campaigns_by_status(
        &self,
        status: CampaignStatus,
        limit: i64,
    ) -> Result<Vec<CampaignRecord>, DatabaseError> {
        self.inner.list_campaigns_by_status(status, limit).await
    }

    async fn update_campaign_status(
        &self,
        id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool, DatabaseError> {
        self.inner.update_campaign_status(id, from, to).await
    }

    async fn delete_campaign(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.inner.delete_campaign(id).await
    }

    async fn increment_current_amount(&self, _id: Uuid, _amount: i64) -> Result<Option<i64>, DatabaseError> {
        Err(DatabaseError::ConnectionError("read-model unreachable".to_string()))
    }

    async fn claim_quick_withdrawal(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.inner.claim_quick_withdrawal(id).await
    }

    async fn release_quick_withdrawal(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.inner.release_quick_withdrawal(id).await
    }
}

// ============================================
// FIXTURE
// ============================================

/// Every service wired over one [`MemoryStore`].
///
/// `bus` is the real in-process bus (inspect it, subscribe to it);
/// services publish through `publisher`, which tests may swap for a
/// [`FailingBus`]. The same goes for `cache` and `cache_backend`.
pub struct Fixture {
    pub config: AppConfig,
    pub store: Arc<MemoryStore>,
    pub stores: Stores,
    pub ledger: Ledger,
    pub bus: Arc<InProcessBus>,
    pub publisher: Arc<dyn EventBus>,
    pub cache: Arc<InMemoryCampaignCache>,
    pub cache_backend: Arc<dyn CampaignCache>,
    pub ws: WsRegistry,
}

impl Fixture {
    pub fn new() -> Self {
        let config = AppConfig::for_tests();
        let store = Arc::new(MemoryStore::new());
        let stores = Stores::from_backend(store.clone());
        let ledger = Ledger::new(stores.ledger.clone(), config.chain_secrets.clone());
        let bus = Arc::new(InProcessBus::new(config.bus_partitions));
        let cache = Arc::new(InMemoryCampaignCache::new());

        Self {
            config,
            store,
            stores,
            ledger,
            publisher: bus.clone(),
            bus,
            cache_backend: cache.clone(),
            cache,
            ws: WsRegistry::new(),
        }
    }

    pub fn with_wallet_fault(mut self, fault: WalletFault) -> Self {
        self.stores.ledger = Arc::new(FaultyWalletStore {
            inner: self.store.clone(),
            fault,
        });
        self.ledger = Ledger::new(self.stores.ledger.clone(), self.config.chain_secrets.clone());
        self
    }

    pub fn with_failing_increments(mut self) -> Self {
        self.stores.campaigns = Arc::new(FailingIncrements {
            inner: self.store.clone(),
        });
        self
    }

    pub fn campaign_service(&self, identity: Arc<dyn IdentityClient>) -> CampaignService {
        CampaignService::new(
            &self.stores,
            self.ledger.clone(),
            identity,
            self.publisher.clone(),
            self.cache_backend.clone(),
            &self.config,
        )
    }

    pub fn donation_service(&self) -> DonationService {
        DonationService::new(
            &self.stores,
            self.publisher.clone(),
            self.cache_backend.clone(),
            self.ws.clone(),
            &self.config,
        )
    }

    pub fn withdrawal_service(&self) -> WithdrawalService {
        WithdrawalService::new(&self.stores)
    }

    pub fn proof_service(&self) -> ProofService {
        ProofService::new(&self.stores, self.publisher.clone(), self.ws.clone(), &self.config)
    }

    /// Insert a campaign directly, bypassing the saga. No wallet.
    pub async fn insert_campaign(&self, status: CampaignStatus, target: i64, current: i64) -> CampaignRecord {
        let now = Utc::now();
        let campaign = CampaignRecord {
            id: Uuid::new_v4(),
            owner_id: "owner-1".to_string(),
            title: "Flood relief".to_string(),
            description: "Rebuild homes".to_string(),
            target_amount: target,
            current_amount: current,
            currency: "VND".to_string(),
            status,
            start_date: None,
            end_date: None,
            has_used_quick_withdrawal: false,
            like_count: 0,
            view_count: 0,
            comment_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_campaign(&campaign).await.unwrap();
        campaign
    }

    /// An ACTIVE campaign with its wallet.
    pub async fn active_campaign(&self, target: i64, current: i64) -> CampaignRecord {
        let campaign = self.insert_campaign(CampaignStatus::Active, target, current).await;
        self.ledger.create_wallet(campaign.id, "VND").await.unwrap();
        campaign
    }
}
