//! # Ledger Service
//!
//! Owns wallets and their hash-chained transaction log. Every balance change
//! in the system goes through [`Ledger::append_transaction`].
//!
//! ## Hash Chain
//!
//! Each wallet has its own chain. Entry `n` commits to entry `n-1`:
//!
//! ```text
//!  genesis "000…0"
//!       │
//!       ▼
//! ┌───────────────┐     ┌───────────────┐     ┌───────────────┐
//! │ seq 0         │     │ seq 1         │     │ seq 2         │
//! │ prev = 000…0  │────>│ prev = h0     │────>│ prev = h1     │
//! │ hash = h0     │     │ hash = h1     │     │ hash = h2     │
//! └───────────────┘     └───────────────┘     └───────────────┘
//!
//! hash = SHA-256(prev | signed amount | wallet id | timestamp | secret)
//! ```
//!
//! The secret never leaves the process, so an entry cannot be forged,
//! edited or reordered without [`Ledger::verify_chain`] noticing.
//!
//! ## Serialization
//!
//! Appends to one chain run one at a time behind a per-wallet async mutex.
//! The store additionally refuses an append whose `previous_hash` is no
//! longer the tail (another process may share the database), in which case
//! the append is recomputed against the new tail.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ChainSecrets;
use crate::db::{
    LedgerEntryRecord, LedgerStore, LedgerWriteError, NewLedgerEntry, TransactionType, WalletRecord,
    WalletStatus,
};
use crate::errors::AppError;

/// `previous_hash` of the first entry of every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// How often an append is recomputed when the tail keeps moving.
const MAX_APPEND_ATTEMPTS: u32 = 3;

/// Compute the hash of a ledger entry.
///
/// The timestamp is rendered with microsecond precision, which is what
/// PostgreSQL stores, so a hash computed before the insert matches the one
/// recomputed from the stored row.
pub fn compute_hash(
    previous_hash: &str,
    signed_amount: i64,
    wallet_id: Uuid,
    timestamp: &DateTime<Utc>,
    secret: &[u8],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(signed_amount.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(wallet_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.to_rfc3339_opts(SecondsFormat::Micros, true).as_bytes());
    hasher.update(b"|");
    hasher.update(secret);
    hex::encode(hasher.finalize())
}

/// A fund movement to append.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub wallet_id: Uuid,

    /// Positive amount in minor units.
    pub amount: i64,
    pub tx_type: TransactionType,
    pub description: String,

    /// Identity of the movement. A second append with the same reference
    /// returns the first entry instead of moving funds again.
    pub reference: Option<String>,
}

/// Overall verdict of a chain audit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainIntegrity {
    Valid,
    Tampered,
    Empty,
}

/// One entry that failed verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvalidEntry {
    pub sequence: i64,
    pub expected_hash: String,
    pub actual_hash: String,
    pub reason: String,
}

/// Result of [`Ledger::verify_chain`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainAudit {
    pub wallet_id: Uuid,
    pub is_valid: bool,
    pub integrity: ChainIntegrity,
    pub total_entries: usize,
    pub invalid_entries: Vec<InvalidEntry>,

    /// Balance stored on the wallet.
    pub cached_balance: i64,

    /// Balance obtained by replaying the chain.
    pub calculated_balance: i64,
    pub balance_match: bool,
    pub verified_at: DateTime<Utc>,
}

/// The ledger service.
///
/// ## Usage
///
/// ```rust,ignore
/// let ledger = Ledger::new(store, config.chain_secrets.clone());
/// let wallet = ledger.create_wallet(campaign_id, "VND").await?;
/// ledger.append_transaction(AppendRequest { wallet_id: wallet.id, .. }).await?;
/// assert!(ledger.verify_chain(wallet.id).await?.is_valid);
/// ```
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    secrets: Arc<ChainSecrets>,
    chain_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, secrets: ChainSecrets) -> Self {
        Self {
            store,
            secrets: Arc::new(secrets),
            chain_locks: Arc::new(DashMap::new()),
        }
    }

    // ============================================
    // WALLETS
    // ============================================

    /// Create the wallet of `campaign_id` with a zero balance.
    ///
    /// Fails with `WALLET_ALREADY_EXISTS` if the campaign has one.
    pub async fn create_wallet(&self, campaign_id: Uuid, currency: &str) -> Result<WalletRecord, AppError> {
        let now = Utc::now();
        let wallet = WalletRecord {
            id: Uuid::new_v4(),
            campaign_id,
            balance: 0,
            total_deposits: 0,
            total_withdrawals: 0,
            currency: currency.to_string(),
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_wallet(&wallet).await?;
        info!("Wallet {} created for campaign {}", wallet.id, campaign_id);
        Ok(wallet)
    }

    /// Return the campaign's wallet, creating it if it does not exist yet.
    ///
    /// Safe to call again after a timeout or crash: an existing wallet is
    /// treated as success.
    pub async fn ensure_wallet(&self, campaign_id: Uuid, currency: &str) -> Result<WalletRecord, AppError> {
        if let Some(existing) = self.store.get_wallet_by_campaign(campaign_id).await? {
            debug!("Wallet {} already provisioned for campaign {}", existing.id, campaign_id);
            return Ok(existing);
        }

        match self.create_wallet(campaign_id, currency).await {
            Err(AppError::WalletAlreadyExists(_)) => self
                .store
                .get_wallet_by_campaign(campaign_id)
                .await?
                .ok_or_else(|| AppError::WalletNotFound(format!("campaign {}", campaign_id))),
            other => other,
        }
    }

    pub async fn get_wallet(&self, wallet_id: Uuid) -> Result<WalletRecord, AppError> {
        self.store
            .get_wallet(wallet_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(wallet_id.to_string()))
    }

    pub async fn get_wallet_by_campaign(&self, campaign_id: Uuid) -> Result<WalletRecord, AppError> {
        self.store
            .get_wallet_by_campaign(campaign_id)
            .await?
            .ok_or_else(|| AppError::WalletNotFound(format!("campaign {}", campaign_id)))
    }

    pub async fn list_wallets(&self, limit: i64, offset: i64) -> Result<Vec<WalletRecord>, AppError> {
        Ok(self.store.list_wallets(limit, offset).await?)
    }

    /// Stop all further movements on a wallet.
    pub async fn lock_wallet(&self, wallet_id: Uuid) -> Result<WalletRecord, AppError> {
        if !self.store.set_wallet_status(wallet_id, WalletStatus::Locked).await? {
            return Err(AppError::WalletNotFound(wallet_id.to_string()));
        }
        info!("Wallet {} locked", wallet_id);
        self.get_wallet(wallet_id).await
    }

    // ============================================
    // TRANSACTIONS
    // ============================================

    /// Append a movement to the wallet's chain and apply it to the balance.
    ///
    /// ## Errors
    ///
    /// * `VALIDATION_ERROR` - amount is not positive
    /// * `WALLET_NOT_FOUND` - no such wallet
    /// * `WALLET_LOCKED` - wallet is not ACTIVE
    /// * `INSUFFICIENT_BALANCE` - a withdrawal larger than the balance
    pub async fn append_transaction(&self, request: AppendRequest) -> Result<LedgerEntryRecord, AppError> {
        if request.amount <= 0 {
            return Err(AppError::Validation("Amount must be greater than 0".to_string()));
        }

        let chain_lock = self.chain_lock(request.wallet_id);
        let _guard = chain_lock.lock().await;

        if let Some(reference) = &request.reference {
            if let Some(existing) = self.store.find_entry_by_reference(request.wallet_id, reference).await? {
                info!("Ledger reference {} already applied as entry {}", reference, existing.sequence);
                return Ok(existing);
            }
        }

        let mut attempt = 1;
        loop {
            let entry = self.next_entry(&request).await?;

            match self.store.append_entry(entry).await {
                Ok(record) => {
                    info!(
                        "Ledger entry {} appended to wallet {}: {} {} (balance {})",
                        record.sequence, record.wallet_id, record.tx_type, record.amount, record.balance_after
                    );
                    return Ok(record);
                }
                Err(LedgerWriteError::TailMoved(wallet_id)) if attempt < MAX_APPEND_ATTEMPTS => {
                    warn!("Chain tail of wallet {} moved, recomputing (attempt {})", wallet_id, attempt);
                    attempt += 1;
                }
                Err(LedgerWriteError::DuplicateReference(reference)) => {
                    return self
                        .store
                        .find_entry_by_reference(request.wallet_id, &reference)
                        .await?
                        .ok_or_else(|| {
                            AppError::Database(crate::db::DatabaseError::NotFound(format!(
                                "ledger reference {}",
                                reference
                            )))
                        });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Build the entry that would follow the current tail.
    async fn next_entry(&self, request: &AppendRequest) -> Result<NewLedgerEntry, AppError> {
        let wallet = self.get_wallet(request.wallet_id).await?;
        if wallet.status != WalletStatus::Active {
            return Err(AppError::WalletLocked(wallet.id));
        }

        let (sequence, previous_hash) = match self.store.chain_tail(wallet.id).await? {
            Some(tail) => (tail.sequence + 1, tail.hash),
            None => (0, GENESIS_HASH.to_string()),
        };

        let timestamp = Utc::now().trunc_subsecs(6);
        let hash = compute_hash(
            &previous_hash,
            request.tx_type.signed(request.amount),
            wallet.id,
            &timestamp,
            self.secrets.current(),
        );

        Ok(NewLedgerEntry {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            sequence,
            amount: request.amount,
            tx_type: request.tx_type,
            description: request.description.clone(),
            reference: request.reference.clone(),
            timestamp,
            previous_hash,
            hash,
            secret_version: self.secrets.current_version(),
        })
    }

    /// Page of a wallet's history, newest first.
    pub async fn history(&self, wallet_id: Uuid, limit: i64, offset: i64) -> Result<Vec<LedgerEntryRecord>, AppError> {
        self.get_wallet(wallet_id).await?;
        Ok(self.store.list_entries_page(wallet_id, limit, offset).await?)
    }

    // ============================================
    // AUDIT
    // ============================================

    /// Recompute every hash of a wallet's chain and replay its balance.
    pub async fn verify_chain(&self, wallet_id: Uuid) -> Result<ChainAudit, AppError> {
        let wallet = self.get_wallet(wallet_id).await?;
        let entries = self.store.list_entries(wallet_id).await?;

        let mut invalid_entries = Vec::new();
        let mut calculated_balance = 0i64;
        let mut expected_previous = GENESIS_HASH.to_string();

        for (position, entry) in entries.iter().enumerate() {
            calculated_balance += entry.tx_type.signed(entry.amount);

            if entry.sequence != position as i64 {
                invalid_entries.push(InvalidEntry {
                    sequence: entry.sequence,
                    expected_hash: entry.hash.clone(),
                    actual_hash: entry.hash.clone(),
                    reason: format!("Sequence gap: expected {}", position),
                });
            }

            if entry.previous_hash != expected_previous {
                let reason = if position == 0 {
                    "Genesis entry has invalid previous hash"
                } else {
                    "Previous hash mismatch"
                };
                invalid_entries.push(InvalidEntry {
                    sequence: entry.sequence,
                    expected_hash: expected_previous.clone(),
                    actual_hash: entry.previous_hash.clone(),
                    reason: reason.to_string(),
                });
            }

            match self.secrets.get(entry.secret_version) {
                Some(secret) => {
                    let expected = compute_hash(
                        &entry.previous_hash,
                        entry.tx_type.signed(entry.amount),
                        wallet_id,
                        &entry.timestamp,
                        secret,
                    );
                    if expected != entry.hash {
                        invalid_entries.push(InvalidEntry {
                            sequence: entry.sequence,
                            expected_hash: expected,
                            actual_hash: entry.hash.clone(),
                            reason: "Hash mismatch".to_string(),
                        });
                    }
                }
                None => invalid_entries.push(InvalidEntry {
                    sequence: entry.sequence,
                    expected_hash: String::new(),
                    actual_hash: entry.hash.clone(),
                    reason: format!("Unknown secret version {}", entry.secret_version),
                }),
            }

            expected_previous = entry.hash.clone();
        }

        let integrity = if entries.is_empty() {
            ChainIntegrity::Empty
        } else if invalid_entries.is_empty() {
            ChainIntegrity::Valid
        } else {
            ChainIntegrity::Tampered
        };
        let balance_match = calculated_balance == wallet.balance;

        let audit = ChainAudit {
            wallet_id,
            is_valid: invalid_entries.is_empty() && balance_match,
            integrity,
            total_entries: entries.len(),
            invalid_entries,
            cached_balance: wallet.balance,
            calculated_balance,
            balance_match,
            verified_at: Utc::now(),
        };

        if audit.is_valid {
            debug!("Chain of wallet {} verified ({} entries)", wallet_id, audit.total_entries);
        } else {
            warn!(
                "Chain of wallet {} failed verification: {:?}, {} invalid entries, balance {} vs {}",
                wallet_id,
                audit.integrity,
                audit.invalid_entries.len(),
                audit.cached_balance,
                audit.calculated_balance
            );
        }

        Ok(audit)
    }

    fn chain_lock(&self, wallet_id: Uuid) -> Arc<Mutex<()>> {
        self.chain_locks
            .entry(wallet_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    const SECRET_V1: &str = "ledger-secret-version-one-32-bytes!!";
    const SECRET_V2: &str = "ledger-secret-version-two-32-bytes!!";

    fn ledger(store: Arc<MemoryStore>) -> Ledger {
        Ledger::new(store, ChainSecrets::new(1, SECRET_V1).unwrap())
    }

    fn deposit(wallet_id: Uuid, amount: i64) -> AppendRequest {
        AppendRequest {
            wallet_id,
            amount,
            tx_type: TransactionType::Deposit,
            description: "donation".to_string(),
            reference: None,
        }
    }

    #[test]
    fn test_hash_depends_on_every_input() {
        let wallet = Uuid::new_v4();
        let ts = Utc::now().trunc_subsecs(6);
        let base = compute_hash(GENESIS_HASH, 100, wallet, &ts, SECRET_V1.as_bytes());

        assert_eq!(base.len(), 64);
        assert_eq!(base, compute_hash(GENESIS_HASH, 100, wallet, &ts, SECRET_V1.as_bytes()));
        assert_ne!(base, compute_hash(GENESIS_HASH, -100, wallet, &ts, SECRET_V1.as_bytes()));
        assert_ne!(base, compute_hash(GENESIS_HASH, 100, Uuid::new_v4(), &ts, SECRET_V1.as_bytes()));
        assert_ne!(base, compute_hash(GENESIS_HASH, 100, wallet, &ts, SECRET_V2.as_bytes()));
    }

    #[tokio::test]
    async fn test_wallet_per_campaign_is_unique() {
        let ledger = ledger(Arc::new(MemoryStore::new()));
        let campaign = Uuid::new_v4();

        ledger.create_wallet(campaign, "VND").await.unwrap();
        let err = ledger.create_wallet(campaign, "VND").await.unwrap_err();
        assert_eq!(err.code(), "WALLET_ALREADY_EXISTS");

        let again = ledger.ensure_wallet(campaign, "VND").await.unwrap();
        assert_eq!(again.campaign_id, campaign);
    }

    #[tokio::test]
    async fn test_appends_keep_chain_valid() {
        let ledger = ledger(Arc::new(MemoryStore::new()));
        let wallet = ledger.create_wallet(Uuid::new_v4(), "VND").await.unwrap();

        let first = ledger.append_transaction(deposit(wallet.id, 500)).await.unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.previous_hash, GENESIS_HASH);

        let second = ledger.append_transaction(deposit(wallet.id, 300)).await.unwrap();
        assert_eq!(second.previous_hash, first.hash);

        ledger
            .append_transaction(AppendRequest {
                tx_type: TransactionType::Withdrawal,
                ..deposit(wallet.id, 200)
            })
            .await
            .unwrap();

        let audit = ledger.verify_chain(wallet.id).await.unwrap();
        assert!(audit.is_valid);
        assert_eq!(audit.integrity, ChainIntegrity::Valid);
        assert_eq!(audit.total_entries, 3);
        assert_eq!(audit.calculated_balance, 600);
        assert_eq!(ledger.get_wallet(wallet.id).await.unwrap().balance, 600);
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let ledger = ledger(Arc::new(MemoryStore::new()));
        let wallet = ledger.create_wallet(Uuid::new_v4(), "VND").await.unwrap();

        let audit = ledger.verify_chain(wallet.id).await.unwrap();
        assert!(audit.is_valid);
        assert_eq!(audit.integrity, ChainIntegrity::Empty);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_serialized() {
        let ledger = ledger(Arc::new(MemoryStore::new()));
        let wallet_id = ledger.create_wallet(Uuid::new_v4(), "VND").await.unwrap().id;

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.append_transaction(deposit(wallet_id, 10 + i)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let audit = ledger.verify_chain(wallet_id).await.unwrap();
        assert!(audit.is_valid, "{:?}", audit.invalid_entries);
        assert_eq!(audit.total_entries, 20);
        assert_eq!(audit.cached_balance, (10..30).sum::<i64>());
    }

    #[tokio::test]
    async fn test_withdrawal_cannot_overdraw() {
        let ledger = ledger(Arc::new(MemoryStore::new()));
        let wallet = ledger.create_wallet(Uuid::new_v4(), "VND").await.unwrap();
        ledger.append_transaction(deposit(wallet.id, 100)).await.unwrap();

        let err = ledger
            .append_transaction(AppendRequest {
                tx_type: TransactionType::Withdrawal,
                ..deposit(wallet.id, 101)
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert_eq!(ledger.get_wallet(wallet.id).await.unwrap().balance, 100);
        assert_eq!(ledger.verify_chain(wallet.id).await.unwrap().total_entries, 1);
    }

    #[tokio::test]
    async fn test_locked_wallet_rejects_appends() {
        let ledger = ledger(Arc::new(MemoryStore::new()));
        let wallet = ledger.create_wallet(Uuid::new_v4(), "VND").await.unwrap();
        ledger.lock_wallet(wallet.id).await.unwrap();

        let err = ledger.append_transaction(deposit(wallet.id, 100)).await.unwrap_err();
        assert_eq!(err.code(), "WALLET_LOCKED");
    }

    #[tokio::test]
    async fn test_reference_applies_once() {
        let ledger = ledger(Arc::new(MemoryStore::new()));
        let wallet = ledger.create_wallet(Uuid::new_v4(), "VND").await.unwrap();
        let request = AppendRequest {
            reference: Some("donation:abc".to_string()),
            ..deposit(wallet.id, 250)
        };

        let first = ledger.append_transaction(request.clone()).await.unwrap();
        let second = ledger.append_transaction(request).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(ledger.get_wallet(wallet.id).await.unwrap().balance, 250);
    }

    #[tokio::test]
    async fn test_tampered_amount_is_detected() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(store.clone());
        let wallet = ledger.create_wallet(Uuid::new_v4(), "VND").await.unwrap();
        for amount in [100, 200, 300] {
            ledger.append_transaction(deposit(wallet.id, amount)).await.unwrap();
        }

        store.tamper_entry(wallet.id, 1, |entry| entry.amount = 20_000);

        let audit = ledger.verify_chain(wallet.id).await.unwrap();
        assert!(!audit.is_valid);
        assert_eq!(audit.integrity, ChainIntegrity::Tampered);
        assert_eq!(audit.invalid_entries.len(), 1);
        assert_eq!(audit.invalid_entries[0].sequence, 1);
        assert_eq!(audit.invalid_entries[0].reason, "Hash mismatch");
    }

    #[tokio::test]
    async fn test_balance_drift_is_detected() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger(store.clone());
        let wallet = ledger.create_wallet(Uuid::new_v4(), "VND").await.unwrap();
        ledger.append_transaction(deposit(wallet.id, 100)).await.unwrap();

        store.tamper_balance(wallet.id, 1_000);

        let audit = ledger.verify_chain(wallet.id).await.unwrap();
        assert_eq!(audit.integrity, ChainIntegrity::Valid);
        assert!(!audit.balance_match);
        assert!(!audit.is_valid);
    }

    #[tokio::test]
    async fn test_chain_survives_secret_rotation() {
        let store = Arc::new(MemoryStore::new());
        let old = ledger(store.clone());
        let wallet = old.create_wallet(Uuid::new_v4(), "VND").await.unwrap();
        old.append_transaction(deposit(wallet.id, 100)).await.unwrap();

        let rotated = Ledger::new(
            store.clone(),
            ChainSecrets::new(2, SECRET_V2).unwrap().with_retired(1, SECRET_V1).unwrap(),
        );
        let entry = rotated.append_transaction(deposit(wallet.id, 50)).await.unwrap();
        assert_eq!(entry.secret_version, 2);
        assert!(rotated.verify_chain(wallet.id).await.unwrap().is_valid);

        // Without the retired secret the old entry cannot be checked.
        let forgetful = Ledger::new(store, ChainSecrets::new(2, SECRET_V2).unwrap());
        let audit = forgetful.verify_chain(wallet.id).await.unwrap();
        assert_eq!(audit.integrity, ChainIntegrity::Tampered);
        assert_eq!(audit.invalid_entries[0].reason, "Unknown secret version 1");
    }
}
