//! Store trait implementations for [`Database`], delegating to [`queries`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::*;
use super::queries;
use super::store::*;
use super::{Database, DatabaseError};

#[async_trait]
impl CampaignStore for Database {
    async fn insert_campaign(&self, campaign: &CampaignRecord) -> Result<(), DatabaseError> {
        queries::insert_campaign(self.pool(), campaign).await
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<CampaignRecord>, DatabaseError> {
        queries::get_campaign(self.pool(), id).await
    }

    async fn list_campaigns(&self, limit: i64, offset: i64) -> Result<Vec<CampaignRecord>, DatabaseError> {
        queries::list_campaigns(self.pool(), limit, offset).await
    }

    async fn list_campaigns_by_status(
        &self,
        status: CampaignStatus,
        limit: i64,
    ) -> Result<Vec<CampaignRecord>, DatabaseError> {
        queries::list_campaigns_by_status(self.pool(), status, limit).await
    }

    async fn update_campaign_status(
        &self,
        id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool, DatabaseError> {
        queries::update_campaign_status(self.pool(), id, from, to).await
    }

    async fn delete_campaign(&self, id: Uuid) -> Result<bool, DatabaseError> {
        queries::delete_campaign(self.pool(), id).await
    }

    async fn increment_current_amount(&self, id: Uuid, amount: i64) -> Result<Option<i64>, DatabaseError> {
        queries::increment_campaign_amount(self.pool(), id, amount).await
    }

    async fn claim_quick_withdrawal(&self, id: Uuid) -> Result<bool, DatabaseError> {
        queries::claim_quick_withdrawal(self.pool(), id).await
    }

    async fn release_quick_withdrawal(&self, id: Uuid) -> Result<bool, DatabaseError> {
        queries::release_quick_withdrawal(self.pool(), id).await
    }
}

#[async_trait]
impl LedgerStore for Database {
    async fn insert_wallet(&self, wallet: &WalletRecord) -> Result<(), LedgerWriteError> {
        queries::insert_wallet(self.pool(), wallet).await
    }

    async fn get_wallet(&self, id: Uuid) -> Result<Option<WalletRecord>, DatabaseError> {
        queries::get_wallet(self.pool(), id).await
    }

    async fn get_wallet_by_campaign(&self, campaign_id: Uuid) -> Result<Option<WalletRecord>, DatabaseError> {
        queries::get_wallet_by_campaign(self.pool(), campaign_id).await
    }

    async fn list_wallets(&self, limit: i64, offset: i64) -> Result<Vec<WalletRecord>, DatabaseError> {
        queries::list_wallets(self.pool(), limit, offset).await
    }

    async fn set_wallet_status(&self, id: Uuid, status: WalletStatus) -> Result<bool, DatabaseError> {
        queries::set_wallet_status(self.pool(), id, status).await
    }

    async fn chain_tail(&self, wallet_id: Uuid) -> Result<Option<ChainTail>, DatabaseError> {
        queries::get_chain_tail(self.pool(), wallet_id).await
    }

    async fn find_entry_by_reference(
        &self,
        wallet_id: Uuid,
        reference: &str,
    ) -> Result<Option<LedgerEntryRecord>, DatabaseError> {
        queries::find_entry_by_reference(self.pool(), wallet_id, reference).await
    }

    async fn append_entry(&self, entry: NewLedgerEntry) -> Result<LedgerEntryRecord, LedgerWriteError> {
        queries::append_ledger_entry(self.pool(), entry).await
    }

    async fn list_entries(&self, wallet_id: Uuid) -> Result<Vec<LedgerEntryRecord>, DatabaseError> {
        queries::list_ledger_entries(self.pool(), wallet_id).await
    }

    async fn list_entries_page(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerEntryRecord>, DatabaseError> {
        queries::list_ledger_entries_page(self.pool(), wallet_id, limit, offset).await
    }
}

#[async_trait]
impl DonationStore for Database {
    async fn insert_donation(&self, donation: &DonationRecord) -> Result<(), DatabaseError> {
        queries::insert_donation(self.pool(), donation).await
    }

    async fn get_donation(&self, id: Uuid) -> Result<Option<DonationRecord>, DatabaseError> {
        queries::get_donation(self.pool(), id).await
    }

    async fn get_donation_by_payment_code(&self, code: &str) -> Result<Option<DonationRecord>, DatabaseError> {
        queries::get_donation_by_payment_code(self.pool(), code).await
    }

    async fn list_donations_by_campaign(
        &self,
        campaign_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DonationRecord>, DatabaseError> {
        queries::list_donations_by_campaign(self.pool(), campaign_id, limit, offset).await
    }

    async fn mark_donation_completed(&self, id: Uuid) -> Result<bool, DatabaseError> {
        queries::mark_donation_completed(self.pool(), id).await
    }

    async fn complete_settlement(
        &self,
        settlement_id: &str,
        donation_id: Uuid,
        external_ref: &str,
    ) -> Result<SettlementWrite, DatabaseError> {
        queries::complete_settlement(self.pool(), settlement_id, donation_id, external_ref).await
    }

    async fn count_completed_donations(&self, campaign_id: Uuid) -> Result<i64, DatabaseError> {
        queries::count_completed_donations(self.pool(), campaign_id).await
    }

    async fn list_unsettled_donations(
        &self,
        completed_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DonationRecord>, DatabaseError> {
        queries::list_unsettled_donations(self.pool(), completed_before, limit).await
    }
}

#[async_trait]
impl IdempotencyStore for Database {
    async fn is_processed(&self, event_id: &str) -> Result<bool, DatabaseError> {
        queries::is_event_processed(self.pool(), event_id).await
    }

    async fn mark_processed(&self, event_id: &str) -> Result<bool, DatabaseError> {
        queries::mark_event_processed(self.pool(), event_id).await
    }
}

#[async_trait]
impl WithdrawalStore for Database {
    async fn insert_withdrawal(&self, withdrawal: &WithdrawalRecord) -> Result<(), DatabaseError> {
        queries::insert_withdrawal(self.pool(), withdrawal).await
    }

    async fn get_withdrawal(&self, id: Uuid) -> Result<Option<WithdrawalRecord>, DatabaseError> {
        queries::get_withdrawal(self.pool(), id).await
    }

    async fn has_in_flight_withdrawal(&self, campaign_id: Uuid) -> Result<bool, DatabaseError> {
        queries::has_in_flight_withdrawal(self.pool(), campaign_id).await
    }

    async fn transition_withdrawal(
        &self,
        id: Uuid,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
        note: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        queries::transition_withdrawal(self.pool(), id, from, to, note).await
    }

    async fn list_withdrawals(
        &self,
        status: Option<WithdrawalStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WithdrawalRecord>, DatabaseError> {
        queries::list_withdrawals(self.pool(), status, limit, offset).await
    }

    async fn list_withdrawals_by_campaign(&self, campaign_id: Uuid) -> Result<Vec<WithdrawalRecord>, DatabaseError> {
        queries::list_withdrawals_by_campaign(self.pool(), campaign_id).await
    }
}

#[async_trait]
impl ProofStore for Database {
    async fn insert_proof(&self, proof: &ProofRecord) -> Result<(), DatabaseError> {
        queries::insert_proof(self.pool(), proof).await
    }

    async fn get_proof(&self, id: Uuid) -> Result<Option<ProofRecord>, DatabaseError> {
        queries::get_proof(self.pool(), id).await
    }

    async fn list_proofs_by_withdrawal(&self, withdrawal_id: Uuid) -> Result<Vec<ProofRecord>, DatabaseError> {
        queries::list_proofs_by_withdrawal(self.pool(), withdrawal_id).await
    }

    async fn delete_proof(&self, id: Uuid) -> Result<bool, DatabaseError> {
        queries::delete_proof(self.pool(), id).await
    }

    async fn apply_verdict(
        &self,
        event_key: &str,
        proof_id: Uuid,
        verdict: &ProofVerdict,
    ) -> Result<VerdictWrite, DatabaseError> {
        queries::apply_proof_verdict(self.pool(), event_key, proof_id, verdict).await
    }
}

#[async_trait]
impl DeadLetterStore for Database {
    async fn record_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), DatabaseError> {
        queries::insert_dead_letter(self.pool(), record).await
    }

    async fn get_dead_letter(&self, id: Uuid) -> Result<Option<DeadLetterRecord>, DatabaseError> {
        queries::get_dead_letter(self.pool(), id).await
    }

    async fn list_dead_letters(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetterRecord>, DatabaseError> {
        queries::list_dead_letters(self.pool(), limit, offset).await
    }

    async fn mark_dead_letter_replayed(&self, id: Uuid) -> Result<bool, DatabaseError> {
        queries::mark_dead_letter_replayed(self.pool(), id).await
    }

    async fn unmark_dead_letter_replayed(&self, id: Uuid) -> Result<(), DatabaseError> {
        queries::unmark_dead_letter_replayed(self.pool(), id).await
    }
}

#[async_trait]
impl ReconciliationStore for Database {
    async fn record_reconciliation(&self, log: &ReconciliationLog) -> Result<(), DatabaseError> {
        queries::insert_reconciliation_log(self.pool(), log).await
    }

    async fn list_reconciliation_logs(&self, limit: i64, offset: i64) -> Result<Vec<ReconciliationLog>, DatabaseError> {
        queries::list_reconciliation_logs(self.pool(), limit, offset).await
    }
}
