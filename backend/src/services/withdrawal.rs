//! # Withdrawal State Machine
//!
//! ```text
//!            create (quick)                     create
//!                 │                               │
//!   claim hasUsedQuickWithdrawal false → true     ▼
//!                 │                            PENDING ──reject──► REJECTED
//!                 ▼                               │ approve
//!             APPROVED                            ▼
//!                 │                          WAITING_PROOF
//!                 └──────── upload proof ─────────┘
//!                                │
//!                                ▼
//!                 AI verdict on the proof (proof.rs)
//! ```
//!
//! Two rules guard concurrent requests:
//!
//! - the quick-withdrawal flag flips in one conditional update, so only
//!   one quick request per campaign can ever succeed;
//! - at most one non-quick request per campaign is WAITING_PROOF or
//!   APPROVED at a time. The store enforces it on every transition.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::{
    CampaignStore, DatabaseError, ReconciliationLog, ReconciliationStore, Stores, WithdrawalRecord,
    WithdrawalStatus, WithdrawalStore, WithdrawalType,
};
use crate::errors::AppError;
use crate::models::CreateWithdrawalRequest;

#[derive(Clone)]
pub struct WithdrawalService {
    campaigns: Arc<dyn CampaignStore>,
    withdrawals: Arc<dyn WithdrawalStore>,
    reconciliation: Arc<dyn ReconciliationStore>,
}

impl WithdrawalService {
    pub fn new(stores: &Stores) -> Self {
        Self {
            campaigns: stores.campaigns.clone(),
            withdrawals: stores.withdrawals.clone(),
            reconciliation: stores.reconciliation.clone(),
        }
    }

    /// Create a withdrawal request.
    ///
    /// Quick requests (`quick: true` or type `QUICK`) consume the
    /// campaign's one-time flag and start out APPROVED. Everything else
    /// starts PENDING and waits for a reviewer.
    ///
    /// ## Errors
    ///
    /// * `CAMPAIGN_NOT_FOUND` - no such campaign
    /// * `QUICK_WITHDRAWAL_ALREADY_USED` - the flag was already consumed
    /// * `WITHDRAWAL_BLOCKED_WAITING_PROOF` - another request is waiting for proof
    pub async fn create(&self, request: CreateWithdrawalRequest) -> Result<WithdrawalRecord, AppError> {
        if request.amount <= 0 {
            return Err(AppError::Validation("amount must be greater than 0".to_string()));
        }
        if request.reason.trim().is_empty() {
            return Err(AppError::Validation("reason is required".to_string()));
        }

        let campaign_id = request.campaign_id;
        if self.campaigns.get_campaign(campaign_id).await?.is_none() {
            return Err(AppError::CampaignNotFound(campaign_id));
        }

        let quick = request.quick || request.withdrawal_type == WithdrawalType::Quick;
        let now = Utc::now();
        let withdrawal = WithdrawalRecord {
            id: Uuid::new_v4(),
            campaign_id,
            amount: request.amount,
            reason: request.reason.trim().to_string(),
            withdrawal_type: request.withdrawal_type,
            quick,
            status: if quick { WithdrawalStatus::Approved } else { WithdrawalStatus::Pending },
            verification_result: None,
            created_at: now,
            updated_at: now,
        };

        if quick {
            self.create_quick(withdrawal).await
        } else {
            if self.withdrawals.has_in_flight_withdrawal(campaign_id).await? {
                return Err(AppError::WithdrawalBlockedWaitingProof(campaign_id));
            }
            self.withdrawals.insert_withdrawal(&withdrawal).await?;
            info!(
                "Withdrawal {} created for campaign {}: {} ({})",
                withdrawal.id, campaign_id, withdrawal.amount, withdrawal.withdrawal_type
            );
            Ok(withdrawal)
        }
    }

    async fn create_quick(&self, withdrawal: WithdrawalRecord) -> Result<WithdrawalRecord, AppError> {
        let campaign_id = withdrawal.campaign_id;

        if !self.campaigns.claim_quick_withdrawal(campaign_id).await? {
            info!("Campaign {} already used its quick withdrawal", campaign_id);
            return Err(AppError::QuickWithdrawalAlreadyUsed(campaign_id));
        }

        if let Err(e) = self.withdrawals.insert_withdrawal(&withdrawal).await {
            error!("Failed to record quick withdrawal for campaign {}: {}", campaign_id, e);
            self.release_flag(&withdrawal, &e).await;
            return Err(e.into());
        }

        info!(
            "⚡ Quick withdrawal {} approved for campaign {}: {}",
            withdrawal.id, campaign_id, withdrawal.amount
        );
        Ok(withdrawal)
    }

    /// Give the quick-withdrawal flag back after a failed insert.
    async fn release_flag(&self, withdrawal: &WithdrawalRecord, cause: &DatabaseError) {
        let campaign_id = withdrawal.campaign_id;

        let failure = match self.campaigns.release_quick_withdrawal(campaign_id).await {
            Ok(true) => return,
            Ok(false) => "flag was not set".to_string(),
            Err(e) => e.to_string(),
        };

        error!("🚨 Could not release quick-withdrawal flag of campaign {}: {}", campaign_id, failure);
        let log = ReconciliationLog::new(
            "campaign",
            campaign_id,
            "QUICK_FLAG_RELEASE_FAILED",
            Some(withdrawal.amount),
            format!("insert failed: {}; release failed: {}", cause, failure),
        );
        if let Err(e) = self.reconciliation.record_reconciliation(&log).await {
            error!("Failed to record reconciliation log for campaign {}: {}", campaign_id, e);
        }
    }

    /// PENDING → WAITING_PROOF.
    pub async fn approve(&self, withdrawal_id: Uuid) -> Result<WithdrawalRecord, AppError> {
        let withdrawal = self.get(withdrawal_id).await?;

        match self
            .withdrawals
            .transition_withdrawal(withdrawal_id, WithdrawalStatus::Pending, WithdrawalStatus::WaitingProof, None)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(self.invalid_status(withdrawal_id, "approve").await),
            Err(DatabaseError::Conflict(reason)) => {
                warn!("Approval of withdrawal {} blocked: {}", withdrawal_id, reason);
                return Err(AppError::WithdrawalBlockedWaitingProof(withdrawal.campaign_id));
            }
            Err(e) => return Err(e.into()),
        }

        info!("Withdrawal {} approved, waiting for proof", withdrawal_id);
        self.get(withdrawal_id).await
    }

    /// PENDING → REJECTED with the reviewer's reason.
    pub async fn reject(&self, withdrawal_id: Uuid, reason: &str) -> Result<WithdrawalRecord, AppError> {
        if reason.trim().is_empty() {
            return Err(AppError::Validation("reason is required".to_string()));
        }
        self.get(withdrawal_id).await?;

        if !self
            .withdrawals
            .transition_withdrawal(
                withdrawal_id,
                WithdrawalStatus::Pending,
                WithdrawalStatus::Rejected,
                Some(reason.trim()),
            )
            .await?
        {
            return Err(self.invalid_status(withdrawal_id, "reject").await);
        }

        info!("Withdrawal {} rejected: {}", withdrawal_id, reason);
        self.get(withdrawal_id).await
    }

    pub async fn get(&self, withdrawal_id: Uuid) -> Result<WithdrawalRecord, AppError> {
        self.withdrawals
            .get_withdrawal(withdrawal_id)
            .await?
            .ok_or(AppError::WithdrawalNotFound(withdrawal_id))
    }

    pub async fn list(
        &self,
        status: Option<WithdrawalStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WithdrawalRecord>, AppError> {
        Ok(self.withdrawals.list_withdrawals(status, limit, offset).await?)
    }

    pub async fn list_by_campaign(&self, campaign_id: Uuid) -> Result<Vec<WithdrawalRecord>, AppError> {
        Ok(self.withdrawals.list_withdrawals_by_campaign(campaign_id).await?)
    }

    async fn invalid_status(&self, withdrawal_id: Uuid, action: &str) -> AppError {
        match self.withdrawals.get_withdrawal(withdrawal_id).await {
            Ok(Some(current)) => AppError::InvalidStatus(format!(
                "cannot {} withdrawal {} in {}",
                action, withdrawal_id, current.status
            )),
            Ok(None) => AppError::WithdrawalNotFound(withdrawal_id),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    fn request(campaign_id: Uuid, withdrawal_type: WithdrawalType, quick: bool) -> CreateWithdrawalRequest {
        CreateWithdrawalRequest {
            campaign_id,
            amount: 2_000_000,
            reason: "Buy construction materials".to_string(),
            withdrawal_type,
            quick,
        }
    }

    #[tokio::test]
    async fn test_concurrent_quick_withdrawals_only_one_wins() {
        let fx = Fixture::new();
        let campaign = fx.active_campaign(10_000_000, 5_000_000).await;
        let service = fx.withdrawal_service();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let service = service.clone();
            let campaign_id = campaign.id;
            handles.push(tokio::spawn(async move {
                service.create(request(campaign_id, WithdrawalType::Standard, true)).await
            }));
        }

        let mut succeeded = 0;
        let mut already_used = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(withdrawal) => {
                    assert_eq!(withdrawal.status, WithdrawalStatus::Approved);
                    succeeded += 1;
                }
                Err(e) => {
                    assert_eq!(e.code(), "QUICK_WITHDRAWAL_ALREADY_USED");
                    already_used += 1;
                }
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(already_used, 9);
        assert_eq!(service.list_by_campaign(campaign.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_quick_type_forces_quick_flag() {
        let fx = Fixture::new();
        let campaign = fx.active_campaign(10_000_000, 0).await;
        let service = fx.withdrawal_service();

        let withdrawal = service.create(request(campaign.id, WithdrawalType::Quick, false)).await.unwrap();
        assert!(withdrawal.quick);

        let err = service.create(request(campaign.id, WithdrawalType::Quick, false)).await.unwrap_err();
        assert_eq!(err.code(), "QUICK_WITHDRAWAL_ALREADY_USED");
    }

    #[tokio::test]
    async fn test_unknown_campaign_rejected_before_claim() {
        let fx = Fixture::new();
        let err = fx
            .withdrawal_service()
            .create(request(Uuid::new_v4(), WithdrawalType::Standard, true))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CAMPAIGN_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_state_machine_transitions() {
        let fx = Fixture::new();
        let campaign = fx.active_campaign(10_000_000, 0).await;
        let service = fx.withdrawal_service();

        let withdrawal = service.create(request(campaign.id, WithdrawalType::Standard, false)).await.unwrap();
        assert_eq!(withdrawal.status, WithdrawalStatus::Pending);

        let approved = service.approve(withdrawal.id).await.unwrap();
        assert_eq!(approved.status, WithdrawalStatus::WaitingProof);

        let err = service.approve(withdrawal.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATUS");

        let err = service.reject(withdrawal.id, "too late").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATUS");
    }

    #[tokio::test]
    async fn test_reject_stores_reason() {
        let fx = Fixture::new();
        let campaign = fx.active_campaign(10_000_000, 0).await;
        let service = fx.withdrawal_service();
        let withdrawal = service.create(request(campaign.id, WithdrawalType::Emergency, false)).await.unwrap();

        let rejected = service.reject(withdrawal.id, "missing invoice").await.unwrap();

        assert_eq!(rejected.status, WithdrawalStatus::Rejected);
        assert_eq!(rejected.verification_result.as_deref(), Some("missing invoice"));
    }

    #[tokio::test]
    async fn test_one_non_quick_withdrawal_in_flight() {
        let fx = Fixture::new();
        let campaign = fx.active_campaign(10_000_000, 0).await;
        let service = fx.withdrawal_service();

        let first = service.create(request(campaign.id, WithdrawalType::Standard, false)).await.unwrap();
        let second = service.create(request(campaign.id, WithdrawalType::Standard, false)).await.unwrap();

        service.approve(first.id).await.unwrap();

        let err = service.approve(second.id).await.unwrap_err();
        assert_eq!(err.code(), "WITHDRAWAL_BLOCKED_WAITING_PROOF");

        let err = service
            .create(request(campaign.id, WithdrawalType::Standard, false))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WITHDRAWAL_BLOCKED_WAITING_PROOF");

        // Quick withdrawals are not held up by the in-flight request.
        service.create(request(campaign.id, WithdrawalType::Quick, true)).await.unwrap();
    }
}
