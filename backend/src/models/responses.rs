//! # API Response Models
//!
//! Structures for outgoing API response bodies.
//! All responses are wrapped in a standard format.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{
    CampaignRecord, DeadLetterRecord, DonationRecord, LedgerEntryRecord, ProofRecord, WalletRecord,
    WithdrawalRecord,
};
use crate::services::campaign_saga::CampaignDetails;
use crate::services::donation::{DonationInit, SettlementOutcome, WebhookOutcome};
use crate::services::proof::VerdictOutcome;
use crate::utils::format_vnd;

/// Standard API response wrapper.
///
/// All API responses follow this format:
///
/// ## Success Response
///
/// ```json
/// {
///     "success": true,
///     "data": { ... },
///     "error": null
/// }
/// ```
///
/// ## Error Response
///
/// ```json
/// {
///     "success": false,
///     "data": null,
///     "error": {
///         "code": "QUICK_WITHDRAWAL_ALREADY_USED",
///         "message": "Campaign ... has already used its quick withdrawal"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (null on error).
    pub data: Option<T>,

    /// Error information (null on success).
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Error code (e.g., "CAMPAIGN_NOT_FOUND").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

// ============================================
// CAMPAIGNS & WALLETS
// ============================================

/// Campaign as returned by the campaign endpoints.
///
/// ## Example Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "id": "550e8400-e29b-41d4-a716-446655440000",
///         "title": "Flood relief",
///         "targetAmount": 10000000,
///         "currentAmount": 2500000,
///         "formattedCurrent": "2,500,000 VND",
///         "progressPercent": 25.0,
///         "status": "ACTIVE"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignResponse {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub target_amount: i64,
    pub current_amount: i64,
    pub formatted_target: String,
    pub formatted_current: String,

    /// Share of the target raised so far, 0-100.
    pub progress_percent: f64,

    pub currency: String,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub has_used_quick_withdrawal: bool,
    pub like_count: i64,
    pub view_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CampaignRecord> for CampaignResponse {
    fn from(c: CampaignRecord) -> Self {
        let progress_percent = if c.target_amount > 0 {
            (c.current_amount as f64 / c.target_amount as f64 * 100.0).min(100.0)
        } else {
            0.0
        };

        Self {
            id: c.id,
            formatted_target: format_vnd(c.target_amount),
            formatted_current: format_vnd(c.current_amount),
            progress_percent,
            owner_id: c.owner_id,
            title: c.title,
            description: c.description,
            target_amount: c.target_amount,
            current_amount: c.current_amount,
            currency: c.currency,
            status: c.status.to_string(),
            start_date: c.start_date,
            end_date: c.end_date,
            has_used_quick_withdrawal: c.has_used_quick_withdrawal,
            like_count: c.like_count,
            view_count: c.view_count,
            comment_count: c.comment_count,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Campaign plus its wallet, returned by `GET /campaigns/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDetailResponse {
    #[serde(flatten)]
    pub campaign: CampaignResponse,

    /// Absent while the campaign is still being provisioned.
    pub wallet: Option<WalletResponse>,
}

impl From<CampaignDetails> for CampaignDetailResponse {
    fn from(d: CampaignDetails) -> Self {
        Self {
            campaign: d.campaign.into(),
            wallet: d.wallet.map(Into::into),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub balance: i64,
    pub formatted_balance: String,
    pub total_deposits: i64,
    pub total_withdrawals: i64,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WalletRecord> for WalletResponse {
    fn from(w: WalletRecord) -> Self {
        Self {
            id: w.id,
            campaign_id: w.campaign_id,
            balance: w.balance,
            formatted_balance: format_vnd(w.balance),
            total_deposits: w.total_deposits,
            total_withdrawals: w.total_withdrawals,
            currency: w.currency,
            status: w.status.to_string(),
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

/// One ledger entry in a wallet's transaction history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub sequence: i64,
    pub transaction_type: String,
    pub amount: i64,
    pub formatted_amount: String,
    pub status: String,
    pub description: String,
    pub reference: Option<String>,
    pub balance_after: i64,
    pub previous_hash: String,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

impl From<LedgerEntryRecord> for TransactionResponse {
    fn from(e: LedgerEntryRecord) -> Self {
        Self {
            id: e.id,
            wallet_id: e.wallet_id,
            sequence: e.sequence,
            transaction_type: e.tx_type.to_string(),
            amount: e.amount,
            formatted_amount: format_vnd(e.amount),
            status: e.status.to_string(),
            description: e.description,
            reference: e.reference,
            balance_after: e.balance_after,
            previous_hash: e.previous_hash,
            hash: e.hash,
            timestamp: e.timestamp,
        }
    }
}

/// Transaction list response with pagination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionListResponse {
    pub wallet_id: Uuid,
    pub transactions: Vec<TransactionResponse>,
    pub offset: i64,
    pub limit: i64,
}

// ============================================
// DONATIONS
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationResponse {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub donor_name: String,
    pub donor_email: Option<String>,
    pub message: Option<String>,
    pub amount: i64,
    pub formatted_amount: String,
    pub payment_code: String,
    pub status: String,
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<DonationRecord> for DonationResponse {
    fn from(d: DonationRecord) -> Self {
        Self {
            id: d.id,
            campaign_id: d.campaign_id,
            donor_name: d.donor_name,
            donor_email: d.donor_email,
            message: d.message,
            formatted_amount: format_vnd(d.amount),
            amount: d.amount,
            payment_code: d.payment_code,
            status: d.status.to_string(),
            external_ref: d.external_ref,
            created_at: d.created_at,
            completed_at: d.completed_at,
        }
    }
}

/// Payment instruction returned by `POST /donations/init`.
///
/// ## Example Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "donationId": "550e8400-e29b-41d4-a716-446655440000",
///         "paymentCode": "TS1718000000000AB12CD34EF",
///         "amount": 200000,
///         "requestedAmount": 200000,
///         "qrUrl": "https://img.vietqr.io/image/970422-0123456789-compact.png?amount=200000&addInfo=...",
///         "status": "PENDING"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationInitResponse {
    pub donation_id: Uuid,
    pub campaign_id: Uuid,
    pub payment_code: String,

    /// Amount to transfer, after clamping to what the campaign still needs.
    pub amount: i64,
    pub requested_amount: i64,
    pub qr_url: String,
    pub status: String,
}

impl From<DonationInit> for DonationInitResponse {
    fn from(init: DonationInit) -> Self {
        Self {
            donation_id: init.donation.id,
            campaign_id: init.donation.campaign_id,
            payment_code: init.donation.payment_code,
            amount: init.donation.amount,
            requested_amount: init.requested_amount,
            qr_url: init.qr_url,
            status: init.donation.status.to_string(),
        }
    }
}

/// Acknowledgement of a payment webhook or settlement callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    pub donation_id: Uuid,

    /// `ACCEPTED`, `ALREADY_COMPLETED`, `SETTLED` or `ALREADY_PROCESSED`.
    pub status: String,
}

impl From<WebhookOutcome> for SettlementResponse {
    fn from(outcome: WebhookOutcome) -> Self {
        let (donation_id, status) = match outcome {
            WebhookOutcome::Accepted(id) => (id, "ACCEPTED"),
            WebhookOutcome::AlreadyCompleted(id) => (id, "ALREADY_COMPLETED"),
        };
        Self {
            donation_id,
            status: status.to_string(),
        }
    }
}

impl SettlementResponse {
    pub fn from_settlement(donation_id: Uuid, outcome: SettlementOutcome) -> Self {
        let status = match outcome {
            SettlementOutcome::Settled => "SETTLED",
            SettlementOutcome::AlreadyProcessed => "ALREADY_PROCESSED",
        };
        Self {
            donation_id,
            status: status.to_string(),
        }
    }
}

// ============================================
// WITHDRAWALS & PROOFS
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalResponse {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub amount: i64,
    pub formatted_amount: String,
    pub reason: String,

    #[serde(rename = "type")]
    pub withdrawal_type: String,
    pub quick: bool,
    pub status: String,

    /// Reviewer note, set on rejection.
    pub verification_result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WithdrawalRecord> for WithdrawalResponse {
    fn from(w: WithdrawalRecord) -> Self {
        Self {
            id: w.id,
            campaign_id: w.campaign_id,
            formatted_amount: format_vnd(w.amount),
            amount: w.amount,
            reason: w.reason,
            withdrawal_type: w.withdrawal_type.to_string(),
            quick: w.quick,
            status: w.status.to_string(),
            verification_result: w.verification_result,
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResponse {
    pub id: Uuid,
    pub withdrawal_id: Uuid,
    pub evidence_url: String,
    pub supporting_urls: Vec<String>,
    pub description: Option<String>,

    #[serde(rename = "type")]
    pub proof_type: String,
    pub ai_status: String,
    pub ai_score: Option<i32>,
    pub ai_analysis: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProofRecord> for ProofResponse {
    fn from(p: ProofRecord) -> Self {
        Self {
            id: p.id,
            withdrawal_id: p.withdrawal_id,
            evidence_url: p.evidence_url,
            supporting_urls: p.supporting_urls,
            description: p.description,
            proof_type: p.proof_type.to_string(),
            ai_status: p.ai_status.to_string(),
            ai_score: p.ai_score,
            ai_analysis: p.ai_analysis,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// Result of the hybrid verification callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictResponse {
    pub proof_id: Uuid,

    /// False when the same verdict had already been applied.
    pub applied: bool,
    pub proof: Option<ProofResponse>,
}

impl VerdictResponse {
    pub fn new(proof_id: Uuid, outcome: VerdictOutcome) -> Self {
        match outcome {
            VerdictOutcome::Applied(proof) => Self {
                proof_id,
                applied: true,
                proof: Some(proof.into()),
            },
            VerdictOutcome::Duplicate => Self {
                proof_id,
                applied: false,
                proof: None,
            },
        }
    }
}

// ============================================
// OPERATIONS
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterResponse {
    pub id: Uuid,
    pub topic: String,
    pub partition_key: String,
    pub payload: serde_json::Value,
    pub error: String,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub replayed_at: Option<DateTime<Utc>>,
}

impl From<DeadLetterRecord> for DeadLetterResponse {
    fn from(d: DeadLetterRecord) -> Self {
        Self {
            id: d.id,
            topic: d.topic,
            partition_key: d.partition_key,
            payload: d.payload,
            error: d.error,
            attempts: d.attempts,
            created_at: d.created_at,
            replayed_at: d.replayed_at,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status: "healthy" or "unhealthy".
    pub status: String,

    /// Store backend in use: "postgres" or "memory".
    pub store_backend: String,

    /// Database connection status. Always true for the memory backend.
    pub database: bool,

    /// Service version.
    pub version: String,

    /// Current timestamp.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CampaignStatus;

    #[test]
    fn test_campaign_progress_capped() {
        let now = Utc::now();
        let campaign = CampaignRecord {
            id: Uuid::new_v4(),
            owner_id: "owner-1".to_string(),
            title: "Flood relief".to_string(),
            description: String::new(),
            target_amount: 1_000_000,
            current_amount: 1_500_000,
            currency: "VND".to_string(),
            status: CampaignStatus::Active,
            start_date: None,
            end_date: None,
            has_used_quick_withdrawal: false,
            like_count: 0,
            view_count: 0,
            comment_count: 0,
            created_at: now,
            updated_at: now,
        };

        let response = CampaignResponse::from(campaign);
        assert_eq!(response.progress_percent, 100.0);
        assert_eq!(response.formatted_current, "1,500,000 VND");
        assert_eq!(response.status, "ACTIVE");
    }

    #[test]
    fn test_error_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::<()>::error("DONATION_NOT_FOUND", "missing")).unwrap();
        assert_eq!(body["success"], false);
        assert!(body["data"].is_null());
        assert_eq!(body["error"]["code"], "DONATION_NOT_FOUND");
    }
}
