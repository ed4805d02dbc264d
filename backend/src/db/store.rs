//! # Store Traits
//!
//! Every persistent concern sits behind one of these traits. The service
//! layer only sees the traits; [`Database`](super::Database) implements
//! them over PostgreSQL and [`MemoryStore`](super::memory::MemoryStore)
//! implements them in-process.
//!
//! Each trait owns one kind of state and only exposes the narrow mutations
//! its owner needs: wallets change through `append_entry`, the quick
//! withdrawal flag through `claim_quick_withdrawal`, donations through the
//! conditional completion calls.
//!
//! Operations that must be atomic across two rows (donation + idempotency
//! marker, proof verdict + idempotency marker, ledger entry + wallet
//! balance) are single trait methods so that each implementation can run
//! them in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::*;
use super::DatabaseError;

/// Failures of the ledger write path.
#[derive(Error, Debug)]
pub enum LedgerWriteError {
    #[error("Wallet not found: {0}")]
    WalletNotFound(Uuid),

    #[error("Wallet already exists for campaign {0}")]
    WalletAlreadyExists(Uuid),

    #[error("Wallet {0} is locked")]
    WalletLocked(Uuid),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    /// Another writer appended to the chain since the tail was read.
    #[error("Chain tail of wallet {0} moved")]
    TailMoved(Uuid),

    /// An entry with this reference already exists in the wallet's chain.
    #[error("Duplicate ledger reference: {0}")]
    DuplicateReference(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ============================================
// CAMPAIGNS
// ============================================

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: &CampaignRecord) -> Result<(), DatabaseError>;

    async fn get_campaign(&self, id: Uuid) -> Result<Option<CampaignRecord>, DatabaseError>;

    async fn list_campaigns(&self, limit: i64, offset: i64) -> Result<Vec<CampaignRecord>, DatabaseError>;

    async fn list_campaigns_by_status(
        &self,
        status: CampaignStatus,
        limit: i64,
    ) -> Result<Vec<CampaignRecord>, DatabaseError>;

    /// Conditional status change. Returns `false` when the campaign is
    /// missing or not in `from`.
    async fn update_campaign_status(
        &self,
        id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool, DatabaseError>;

    async fn delete_campaign(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Add `amount` to the running total and return the new total.
    async fn increment_current_amount(&self, id: Uuid, amount: i64) -> Result<Option<i64>, DatabaseError>;

    /// Flip `has_used_quick_withdrawal` false → true in one conditional
    /// update. `false` means the flag was already set (or no such campaign).
    async fn claim_quick_withdrawal(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Undo a claim whose withdrawal could not be recorded.
    async fn release_quick_withdrawal(&self, id: Uuid) -> Result<bool, DatabaseError>;
}

// ============================================
// LEDGER
// ============================================

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_wallet(&self, wallet: &WalletRecord) -> Result<(), LedgerWriteError>;

    async fn get_wallet(&self, id: Uuid) -> Result<Option<WalletRecord>, DatabaseError>;

    async fn get_wallet_by_campaign(&self, campaign_id: Uuid) -> Result<Option<WalletRecord>, DatabaseError>;

    async fn list_wallets(&self, limit: i64, offset: i64) -> Result<Vec<WalletRecord>, DatabaseError>;

    async fn set_wallet_status(&self, id: Uuid, status: WalletStatus) -> Result<bool, DatabaseError>;

    async fn chain_tail(&self, wallet_id: Uuid) -> Result<Option<ChainTail>, DatabaseError>;

    async fn find_entry_by_reference(
        &self,
        wallet_id: Uuid,
        reference: &str,
    ) -> Result<Option<LedgerEntryRecord>, DatabaseError>;

    /// Append `entry` and move the wallet balance in one transaction.
    ///
    /// The write only happens if the chain tail still has
    /// `entry.previous_hash` (or the chain is empty and `entry.sequence`
    /// is 0); otherwise `TailMoved` is returned and nothing changes.
    async fn append_entry(&self, entry: NewLedgerEntry) -> Result<LedgerEntryRecord, LedgerWriteError>;

    /// Full chain, oldest first.
    async fn list_entries(&self, wallet_id: Uuid) -> Result<Vec<LedgerEntryRecord>, DatabaseError>;

    /// Page of the chain, newest first.
    async fn list_entries_page(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntryRecord>, DatabaseError>;
}

// ============================================
// DONATIONS & IDEMPOTENCY
// ============================================

#[async_trait]
pub trait DonationStore: Send + Sync {
    async fn insert_donation(&self, donation: &DonationRecord) -> Result<(), DatabaseError>;

    async fn get_donation(&self, id: Uuid) -> Result<Option<DonationRecord>, DatabaseError>;

    async fn get_donation_by_payment_code(&self, code: &str) -> Result<Option<DonationRecord>, DatabaseError>;

    async fn list_donations_by_campaign(
        &self,
        campaign_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DonationRecord>, DatabaseError>;

    /// PENDING → COMPLETED. `false` if the donation was not PENDING.
    async fn mark_donation_completed(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Insert the idempotency marker `settlement_id` and complete the
    /// donation with `external_ref`, both or neither.
    async fn complete_settlement(
        &self,
        settlement_id: &str,
        donation_id: Uuid,
        external_ref: &str,
    ) -> Result<SettlementWrite, DatabaseError>;

    async fn count_completed_donations(&self, campaign_id: Uuid) -> Result<i64, DatabaseError>;

    /// COMPLETED donations without a settlement reference, completed at or
    /// before `completed_before`, oldest first.
    async fn list_unsettled_donations(
        &self,
        completed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DonationRecord>, DatabaseError>;
}

/// Durable "already processed" markers.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn is_processed(&self, event_id: &str) -> Result<bool, DatabaseError>;

    /// Insert-if-absent. `true` when this call created the marker.
    async fn mark_processed(&self, event_id: &str) -> Result<bool, DatabaseError>;
}

// ============================================
// WITHDRAWALS & PROOFS
// ============================================

#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    async fn insert_withdrawal(&self, withdrawal: &WithdrawalRecord) -> Result<(), DatabaseError>;

    async fn get_withdrawal(&self, id: Uuid) -> Result<Option<WithdrawalRecord>, DatabaseError>;

    /// Whether a non-quick request of this campaign is WAITING_PROOF or APPROVED.
    async fn has_in_flight_withdrawal(&self, campaign_id: Uuid) -> Result<bool, DatabaseError>;

    /// Conditional status change. `Ok(false)` when the request is not in
    /// `from`; `Err(DatabaseError::Conflict)` when the change would put a
    /// second non-quick request of the same campaign in flight.
    async fn transition_withdrawal(
        &self,
        id: Uuid,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
        note: Option<&str>,
    ) -> Result<bool, DatabaseError>;

    async fn list_withdrawals(
        &self,
        status: Option<WithdrawalStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WithdrawalRecord>, DatabaseError>;

    async fn list_withdrawals_by_campaign(&self, campaign_id: Uuid) -> Result<Vec<WithdrawalRecord>, DatabaseError>;
}

#[async_trait]
pub trait ProofStore: Send + Sync {
    async fn insert_proof(&self, proof: &ProofRecord) -> Result<(), DatabaseError>;

    async fn get_proof(&self, id: Uuid) -> Result<Option<ProofRecord>, DatabaseError>;

    async fn list_proofs_by_withdrawal(&self, withdrawal_id: Uuid) -> Result<Vec<ProofRecord>, DatabaseError>;

    async fn delete_proof(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Insert the idempotency marker `event_key` and write the verdict,
    /// both or neither.
    async fn apply_verdict(
        &self,
        event_key: &str,
        proof_id: Uuid,
        verdict: &ProofVerdict,
    ) -> Result<VerdictWrite, DatabaseError>;
}

// ============================================
// OPERATIONS
// ============================================

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn record_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), DatabaseError>;

    async fn get_dead_letter(&self, id: Uuid) -> Result<Option<DeadLetterRecord>, DatabaseError>;

    async fn list_dead_letters(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetterRecord>, DatabaseError>;

    async fn mark_dead_letter_replayed(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Clear the replay mark after the re-publish failed.
    async fn unmark_dead_letter_replayed(&self, id: Uuid) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    async fn record_reconciliation(&self, log: &ReconciliationLog) -> Result<(), DatabaseError>;

    async fn list_reconciliation_logs(&self, limit: i64, offset: i64) -> Result<Vec<ReconciliationLog>, DatabaseError>;
}
