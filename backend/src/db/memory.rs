//! # In-Memory Store
//!
//! Process-local implementation of every store trait. Used when
//! `STORE_BACKEND=memory` and as the backing store in unit tests.
//!
//! All state lives behind one mutex, so each trait method is atomic in the
//! same way a single SQL transaction is. Uniqueness rules of the SQL schema
//! (one wallet per campaign, unique payment codes, unique ledger references,
//! one non-quick withdrawal in flight per campaign) are enforced here too.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::*;
use super::store::*;
use super::DatabaseError;

#[derive(Default)]
struct State {
    campaigns: HashMap<Uuid, CampaignRecord>,
    wallets: HashMap<Uuid, WalletRecord>,
    /// Chains keyed by wallet id, oldest entry first.
    entries: HashMap<Uuid, Vec<LedgerEntryRecord>>,
    donations: HashMap<Uuid, DonationRecord>,
    processed: HashSet<String>,
    withdrawals: HashMap<Uuid, WithdrawalRecord>,
    proofs: HashMap<Uuid, ProofRecord>,
    dead_letters: Vec<DeadLetterRecord>,
    reconciliation: Vec<ReconciliationLog>,
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, DatabaseError> {
        self.state
            .lock()
            .map_err(|_| DatabaseError::ConnectionError("memory store poisoned".to_string()))
    }

    /// Overwrite a stored ledger entry. Only tests use this, to simulate
    /// tampering with the chain.
    #[cfg(test)]
    pub fn tamper_entry(&self, wallet_id: Uuid, sequence: i64, f: impl FnOnce(&mut LedgerEntryRecord)) {
        let mut state = self.state().unwrap();
        let entry = state
            .entries
            .get_mut(&wallet_id)
            .and_then(|chain| chain.iter_mut().find(|e| e.sequence == sequence))
            .expect("entry to tamper with");
        f(entry);
    }

    /// Overwrite a wallet's cached balance without touching the chain.
    #[cfg(test)]
    pub fn tamper_balance(&self, wallet_id: Uuid, balance: i64) {
        let mut state = self.state().unwrap();
        state.wallets.get_mut(&wallet_id).expect("wallet").balance = balance;
    }
}

fn page<T: Clone>(items: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

// ============================================
// CAMPAIGNS
// ============================================

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn insert_campaign(&self, campaign: &CampaignRecord) -> Result<(), DatabaseError> {
        let mut state = self.state()?;
        if state.campaigns.contains_key(&campaign.id) {
            return Err(DatabaseError::Conflict(format!("campaign {} exists", campaign.id)));
        }
        state.campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<CampaignRecord>, DatabaseError> {
        Ok(self.state()?.campaigns.get(&id).cloned())
    }

    async fn list_campaigns(&self, limit: i64, offset: i64) -> Result<Vec<CampaignRecord>, DatabaseError> {
        let state = self.state()?;
        let mut all: Vec<_> = state.campaigns.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(all.into_iter(), limit, offset))
    }

    async fn list_campaigns_by_status(
        &self,
        status: CampaignStatus,
        limit: i64,
    ) -> Result<Vec<CampaignRecord>, DatabaseError> {
        let state = self.state()?;
        let mut matching: Vec<_> = state
            .campaigns
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(page(matching.into_iter(), limit, 0))
    }

    async fn update_campaign_status(
        &self,
        id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state()?;
        match state.campaigns.get_mut(&id) {
            Some(campaign) if campaign.status == from => {
                campaign.status = to;
                campaign.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_campaign(&self, id: Uuid) -> Result<bool, DatabaseError> {
        Ok(self.state()?.campaigns.remove(&id).is_some())
    }

    async fn increment_current_amount(&self, id: Uuid, amount: i64) -> Result<Option<i64>, DatabaseError> {
        let mut state = self.state()?;
        Ok(state.campaigns.get_mut(&id).map(|campaign| {
            campaign.current_amount += amount;
            campaign.updated_at = Utc::now();
            campaign.current_amount
        }))
    }

    async fn claim_quick_withdrawal(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let mut state = self.state()?;
        match state.campaigns.get_mut(&id) {
            Some(campaign) if !campaign.has_used_quick_withdrawal => {
                campaign.has_used_quick_withdrawal = true;
                campaign.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_quick_withdrawal(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let mut state = self.state()?;
        match state.campaigns.get_mut(&id) {
            Some(campaign) if campaign.has_used_quick_withdrawal => {
                campaign.has_used_quick_withdrawal = false;
                campaign.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================
// LEDGER
// ============================================

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_wallet(&self, wallet: &WalletRecord) -> Result<(), LedgerWriteError> {
        let mut state = self.state()?;
        if state.wallets.values().any(|w| w.campaign_id == wallet.campaign_id) {
            return Err(LedgerWriteError::WalletAlreadyExists(wallet.campaign_id));
        }
        state.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn get_wallet(&self, id: Uuid) -> Result<Option<WalletRecord>, DatabaseError> {
        Ok(self.state()?.wallets.get(&id).cloned())
    }

    async fn get_wallet_by_campaign(&self, campaign_id: Uuid) -> Result<Option<WalletRecord>, DatabaseError> {
        Ok(self
            .state()?
            .wallets
            .values()
            .find(|w| w.campaign_id == campaign_id)
            .cloned())
    }

    async fn list_wallets(&self, limit: i64, offset: i64) -> Result<Vec<WalletRecord>, DatabaseError> {
        let state = self.state()?;
        let mut all: Vec<_> = state.wallets.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(page(all.into_iter(), limit, offset))
    }

    async fn set_wallet_status(&self, id: Uuid, status: WalletStatus) -> Result<bool, DatabaseError> {
        let mut state = self.state()?;
        Ok(state
            .wallets
            .get_mut(&id)
            .map(|wallet| {
                wallet.status = status;
                wallet.updated_at = Utc::now();
            })
            .is_some())
    }

    async fn chain_tail(&self, wallet_id: Uuid) -> Result<Option<ChainTail>, DatabaseError> {
        let state = self.state()?;
        Ok(state
            .entries
            .get(&wallet_id)
            .and_then(|chain| chain.last())
            .map(|entry| ChainTail {
                sequence: entry.sequence,
                hash: entry.hash.clone(),
            }))
    }

    async fn find_entry_by_reference(
        &self,
        wallet_id: Uuid,
        reference: &str,
    ) -> Result<Option<LedgerEntryRecord>, DatabaseError> {
        let state = self.state()?;
        Ok(state
            .entries
            .get(&wallet_id)
            .and_then(|chain| chain.iter().find(|e| e.reference.as_deref() == Some(reference)))
            .cloned())
    }

    async fn append_entry(&self, entry: NewLedgerEntry) -> Result<LedgerEntryRecord, LedgerWriteError> {
        let mut guard = self.state()?;
        let state = &mut *guard;

        let wallet = state
            .wallets
            .get_mut(&entry.wallet_id)
            .ok_or(LedgerWriteError::WalletNotFound(entry.wallet_id))?;
        if wallet.status != WalletStatus::Active {
            return Err(LedgerWriteError::WalletLocked(entry.wallet_id));
        }

        let chain = state.entries.entry(entry.wallet_id).or_default();
        if let Some(reference) = &entry.reference {
            if chain.iter().any(|e| e.reference.as_ref() == Some(reference)) {
                return Err(LedgerWriteError::DuplicateReference(reference.clone()));
            }
        }

        let tail_matches = match chain.last() {
            None => entry.sequence == 0,
            Some(tail) => tail.hash == entry.previous_hash && tail.sequence + 1 == entry.sequence,
        };
        if !tail_matches {
            return Err(LedgerWriteError::TailMoved(entry.wallet_id));
        }

        let new_balance = wallet.balance + entry.tx_type.signed(entry.amount);
        if new_balance < 0 {
            return Err(LedgerWriteError::InsufficientBalance {
                available: wallet.balance,
                requested: entry.amount,
            });
        }

        wallet.balance = new_balance;
        match entry.tx_type {
            TransactionType::Deposit => wallet.total_deposits += entry.amount,
            TransactionType::Withdrawal => wallet.total_withdrawals += entry.amount,
        }
        wallet.updated_at = Utc::now();

        let record = entry.into_record(new_balance);
        chain.push(record.clone());
        Ok(record)
    }

    async fn list_entries(&self, wallet_id: Uuid) -> Result<Vec<LedgerEntryRecord>, DatabaseError> {
        Ok(self.state()?.entries.get(&wallet_id).cloned().unwrap_or_default())
    }

    async fn list_entries_page(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntryRecord>, DatabaseError> {
        let state = self.state()?;
        let chain = state.entries.get(&wallet_id).map(Vec::as_slice).unwrap_or_default();
        Ok(page(chain.iter().rev().cloned(), limit, offset))
    }
}

// ============================================
// DONATIONS & IDEMPOTENCY
// ============================================

#[async_trait]
impl DonationStore for MemoryStore {
    async fn insert_donation(&self, donation: &DonationRecord) -> Result<(), DatabaseError> {
        let mut state = self.state()?;
        if state.donations.values().any(|d| d.payment_code == donation.payment_code) {
            return Err(DatabaseError::Conflict(format!(
                "payment code {} already issued",
                donation.payment_code
            )));
        }
        state.donations.insert(donation.id, donation.clone());
        Ok(())
    }

    async fn get_donation(&self, id: Uuid) -> Result<Option<DonationRecord>, DatabaseError> {
        Ok(self.state()?.donations.get(&id).cloned())
    }

    async fn get_donation_by_payment_code(&self, code: &str) -> Result<Option<DonationRecord>, DatabaseError> {
        Ok(self
            .state()?
            .donations
            .values()
            .find(|d| d.payment_code == code)
            .cloned())
    }

    async fn list_donations_by_campaign(
        &self,
        campaign_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DonationRecord>, DatabaseError> {
        let state = self.state()?;
        let mut matching: Vec<_> = state
            .donations
            .values()
            .filter(|d| d.campaign_id == campaign_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(matching.into_iter(), limit, offset))
    }

    async fn mark_donation_completed(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let mut state = self.state()?;
        match state.donations.get_mut(&id) {
            Some(donation) if donation.status == DonationStatus::Pending => {
                donation.status = DonationStatus::Completed;
                donation.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_settlement(
        &self,
        settlement_id: &str,
        donation_id: Uuid,
        external_ref: &str,
    ) -> Result<SettlementWrite, DatabaseError> {
        let mut guard = self.state()?;
        let state = &mut *guard;

        if state.processed.contains(settlement_id) {
            return Ok(SettlementWrite::AlreadyProcessed);
        }
        let donation = state
            .donations
            .get_mut(&donation_id)
            .ok_or_else(|| DatabaseError::NotFound(format!("donation {}", donation_id)))?;

        donation.status = DonationStatus::Completed;
        donation.external_ref = Some(external_ref.to_string());
        donation.completed_at.get_or_insert_with(Utc::now);
        state.processed.insert(settlement_id.to_string());

        Ok(SettlementWrite::Applied)
    }

    async fn count_completed_donations(&self, campaign_id: Uuid) -> Result<i64, DatabaseError> {
        let state = self.state()?;
        Ok(state
            .donations
            .values()
            .filter(|d| d.campaign_id == campaign_id && d.status == DonationStatus::Completed)
            .count() as i64)
    }

    async fn list_unsettled_donations(
        &self,
        completed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DonationRecord>, DatabaseError> {
        let state = self.state()?;
        let mut unsettled: Vec<DonationRecord> = state
            .donations
            .values()
            .filter(|d| d.status == DonationStatus::Completed && d.external_ref.is_none())
            .filter(|d| d.completed_at.is_some_and(|at| at <= completed_before))
            .cloned()
            .collect();
        unsettled.sort_by_key(|d| d.completed_at);
        unsettled.truncate(limit.max(0) as usize);
        Ok(unsettled)
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn is_processed(&self, event_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.state()?.processed.contains(event_id))
    }

    async fn mark_processed(&self, event_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.state()?.processed.insert(event_id.to_string()))
    }
}

// ============================================
// WITHDRAWALS & PROOFS
// ============================================

fn in_flight_elsewhere(state: &State, campaign_id: Uuid, except: Option<Uuid>) -> bool {
    state.withdrawals.values().any(|w| {
        w.campaign_id == campaign_id && !w.quick && w.status.is_in_flight() && Some(w.id) != except
    })
}

#[async_trait]
impl WithdrawalStore for MemoryStore {
    async fn insert_withdrawal(&self, withdrawal: &WithdrawalRecord) -> Result<(), DatabaseError> {
        let mut state = self.state()?;
        if !withdrawal.quick
            && withdrawal.status.is_in_flight()
            && in_flight_elsewhere(&state, withdrawal.campaign_id, None)
        {
            return Err(DatabaseError::Conflict(format!(
                "campaign {} already has a withdrawal in flight",
                withdrawal.campaign_id
            )));
        }
        state.withdrawals.insert(withdrawal.id, withdrawal.clone());
        Ok(())
    }

    async fn get_withdrawal(&self, id: Uuid) -> Result<Option<WithdrawalRecord>, DatabaseError> {
        Ok(self.state()?.withdrawals.get(&id).cloned())
    }

    async fn has_in_flight_withdrawal(&self, campaign_id: Uuid) -> Result<bool, DatabaseError> {
        Ok(in_flight_elsewhere(&*self.state()?, campaign_id, None))
    }

    async fn transition_withdrawal(
        &self,
        id: Uuid,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
        note: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.state()?;

        let Some(current) = state.withdrawals.get(&id) else {
            return Ok(false);
        };
        if current.status != from {
            return Ok(false);
        }
        if !current.quick && to.is_in_flight() && in_flight_elsewhere(&state, current.campaign_id, Some(id)) {
            return Err(DatabaseError::Conflict(format!(
                "withdrawal {} cannot enter {} while another request is in flight",
                id, to
            )));
        }

        if let Some(withdrawal) = state.withdrawals.get_mut(&id) {
            withdrawal.status = to;
            if let Some(note) = note {
                withdrawal.verification_result = Some(note.to_string());
            }
            withdrawal.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn list_withdrawals(
        &self,
        status: Option<WithdrawalStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WithdrawalRecord>, DatabaseError> {
        let state = self.state()?;
        let mut matching: Vec<_> = state
            .withdrawals
            .values()
            .filter(|w| status.map_or(true, |s| w.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(matching.into_iter(), limit, offset))
    }

    async fn list_withdrawals_by_campaign(&self, campaign_id: Uuid) -> Result<Vec<WithdrawalRecord>, DatabaseError> {
        let state = self.state()?;
        let mut matching: Vec<_> = state
            .withdrawals
            .values()
            .filter(|w| w.campaign_id == campaign_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }
}

#[async_trait]
impl ProofStore for MemoryStore {
    async fn insert_proof(&self, proof: &ProofRecord) -> Result<(), DatabaseError> {
        let mut state = self.state()?;
        if !state.withdrawals.contains_key(&proof.withdrawal_id) {
            return Err(DatabaseError::NotFound(format!("withdrawal {}", proof.withdrawal_id)));
        }
        state.proofs.insert(proof.id, proof.clone());
        Ok(())
    }

    async fn get_proof(&self, id: Uuid) -> Result<Option<ProofRecord>, DatabaseError> {
        Ok(self.state()?.proofs.get(&id).cloned())
    }

    async fn list_proofs_by_withdrawal(&self, withdrawal_id: Uuid) -> Result<Vec<ProofRecord>, DatabaseError> {
        let state = self.state()?;
        let mut matching: Vec<_> = state
            .proofs
            .values()
            .filter(|p| p.withdrawal_id == withdrawal_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn delete_proof(&self, id: Uuid) -> Result<bool, DatabaseError> {
        Ok(self.state()?.proofs.remove(&id).is_some())
    }

    async fn apply_verdict(
        &self,
        event_key: &str,
        proof_id: Uuid,
        verdict: &ProofVerdict,
    ) -> Result<VerdictWrite, DatabaseError> {
        let mut guard = self.state()?;
        let state = &mut *guard;

        if state.processed.contains(event_key) {
            return Ok(VerdictWrite::Duplicate);
        }
        let Some(proof) = state.proofs.get_mut(&proof_id) else {
            return Ok(VerdictWrite::ProofNotFound);
        };

        proof.ai_status = verdict.ai_status;
        proof.ai_score = Some(verdict.ai_score);
        proof.ai_analysis = Some(verdict.ai_analysis.clone());
        proof.updated_at = Utc::now();
        let updated = proof.clone();
        state.processed.insert(event_key.to_string());

        Ok(VerdictWrite::Applied(updated))
    }
}

// ============================================
// OPERATIONS
// ============================================

#[async_trait]
impl DeadLetterStore for MemoryStore {
    async fn record_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), DatabaseError> {
        self.state()?.dead_letters.push(record.clone());
        Ok(())
    }

    async fn get_dead_letter(&self, id: Uuid) -> Result<Option<DeadLetterRecord>, DatabaseError> {
        Ok(self.state()?.dead_letters.iter().find(|d| d.id == id).cloned())
    }

    async fn list_dead_letters(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetterRecord>, DatabaseError> {
        let state = self.state()?;
        Ok(page(state.dead_letters.iter().rev().cloned(), limit, offset))
    }

    async fn mark_dead_letter_replayed(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let mut state = self.state()?;
        match state.dead_letters.iter_mut().find(|d| d.id == id) {
            Some(record) if record.replayed_at.is_none() => {
                record.replayed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unmark_dead_letter_replayed(&self, id: Uuid) -> Result<(), DatabaseError> {
        let mut state = self.state()?;
        if let Some(record) = state.dead_letters.iter_mut().find(|d| d.id == id) {
            record.replayed_at = None;
        }
        Ok(())
    }
}

#[async_trait]
impl ReconciliationStore for MemoryStore {
    async fn record_reconciliation(&self, log: &ReconciliationLog) -> Result<(), DatabaseError> {
        self.state()?.reconciliation.push(log.clone());
        Ok(())
    }

    async fn list_reconciliation_logs(&self, limit: i64, offset: i64) -> Result<Vec<ReconciliationLog>, DatabaseError> {
        let state = self.state()?;
        Ok(page(state.reconciliation.iter().rev().cloned(), limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(campaign_id: Uuid) -> WalletRecord {
        let now = Utc::now();
        WalletRecord {
            id: Uuid::new_v4(),
            campaign_id,
            balance: 0,
            total_deposits: 0,
            total_withdrawals: 0,
            currency: "VND".to_string(),
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    fn entry(wallet_id: Uuid, sequence: i64, previous_hash: &str, hash: &str) -> NewLedgerEntry {
        NewLedgerEntry {
            id: Uuid::new_v4(),
            wallet_id,
            sequence,
            amount: 100,
            tx_type: TransactionType::Deposit,
            description: "test".to_string(),
            reference: None,
            timestamp: Utc::now(),
            previous_hash: previous_hash.to_string(),
            hash: hash.to_string(),
            secret_version: 1,
        }
    }

    #[tokio::test]
    async fn test_one_wallet_per_campaign() {
        let store = MemoryStore::new();
        let campaign_id = Uuid::new_v4();

        store.insert_wallet(&wallet(campaign_id)).await.unwrap();
        let err = store.insert_wallet(&wallet(campaign_id)).await.unwrap_err();
        assert!(matches!(err, LedgerWriteError::WalletAlreadyExists(id) if id == campaign_id));
    }

    #[tokio::test]
    async fn test_append_rejects_stale_tail() {
        let store = MemoryStore::new();
        let w = wallet(Uuid::new_v4());
        store.insert_wallet(&w).await.unwrap();

        store.append_entry(entry(w.id, 0, "genesis", "h0")).await.unwrap();
        let err = store.append_entry(entry(w.id, 1, "not-h0", "h1")).await.unwrap_err();
        assert!(matches!(err, LedgerWriteError::TailMoved(_)));

        let appended = store.append_entry(entry(w.id, 1, "h0", "h1")).await.unwrap();
        assert_eq!(appended.balance_after, 200);
    }

    #[tokio::test]
    async fn test_settlement_marker_is_atomic_with_donation() {
        let store = MemoryStore::new();
        let err = store.complete_settlement("s-1", Uuid::new_v4(), "ref").await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
        // Failed write must not leave the marker behind.
        assert!(!store.is_processed("s-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_processed_is_insert_if_absent() {
        let store = MemoryStore::new();
        assert!(store.mark_processed("evt").await.unwrap());
        assert!(!store.mark_processed("evt").await.unwrap());
        assert!(store.is_processed("evt").await.unwrap());
    }
}
