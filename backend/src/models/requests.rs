//! # API Request Models
//!
//! Structures for incoming API request bodies and query strings.
//! Each struct represents the expected JSON body for an endpoint.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{TransactionType, WithdrawalStatus, WithdrawalType};

/// Request to create a campaign.
///
/// ## Example JSON
///
/// ```json
/// {
///     "ownerId": "user-42",
///     "title": "Flood relief",
///     "description": "Rebuild homes in Quang Binh",
///     "targetAmount": 1000000,
///     "startDate": "2025-10-01",
///     "endDate": "2025-12-31"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    /// Identity-service user id of the organizer.
    pub owner_id: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Fundraising goal in VND.
    pub target_amount: i64,

    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Request to start a donation.
///
/// ## Example JSON
///
/// ```json
/// {
///     "campaignId": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
///     "amount": 500000,
///     "donorName": "Lan",
///     "message": "Good luck!"
/// }
/// ```
///
/// ## Notes
///
/// - `amount` is clamped to what the campaign still needs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitDonationRequest {
    pub campaign_id: Uuid,
    pub amount: i64,

    /// Shown in the activity feed. Defaults to "Anonymous".
    #[serde(default)]
    pub donor_name: Option<String>,

    #[serde(default)]
    pub donor_email: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

/// Payment provider notification.
///
/// Providers differ in field names; `description`/`amount` are accepted
/// as aliases.
///
/// ## Example JSON
///
/// ```json
/// {
///     "gateway": "MBBank",
///     "content": "TS1733660000000AB12CD34EF Flood relief",
///     "transferAmount": 100000,
///     "referenceCode": "FT25342123456"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWebhookRequest {
    /// Free-text transfer description that contains the payment code.
    #[serde(alias = "description")]
    pub content: String,

    #[serde(alias = "amount")]
    pub transfer_amount: i64,

    #[serde(default)]
    pub gateway: Option<String>,

    /// Bank-side transaction reference.
    #[serde(default)]
    pub reference_code: Option<String>,
}

/// Settlement confirmation from the ledger side.
///
/// ## Example JSON
///
/// ```json
/// {
///     "donationId": "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
///     "campaignId": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
///     "amount": 100000,
///     "transactionHash": "9f2c..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationCompleteRequest {
    /// Also the settlement id: one settlement per donation.
    pub donation_id: Uuid,
    pub campaign_id: Uuid,
    pub amount: i64,

    /// Hash of the ledger entry that credited the donation.
    #[serde(alias = "externalRef")]
    pub transaction_hash: String,
}

/// Request to withdraw funds from a campaign.
///
/// ## Example JSON
///
/// ```json
/// {
///     "campaignId": "7c9e6679-7425-40de-944b-e07fc1f90ae7",
///     "amount": 2000000,
///     "reason": "Buy construction materials",
///     "type": "STANDARD"
/// }
/// ```
///
/// `type: "QUICK"` always uses the campaign's one-time quick withdrawal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWithdrawalRequest {
    pub campaign_id: Uuid,
    pub amount: i64,
    pub reason: String,

    #[serde(rename = "type", default = "default_withdrawal_type")]
    pub withdrawal_type: WithdrawalType,

    #[serde(default)]
    pub quick: bool,
}

fn default_withdrawal_type() -> WithdrawalType {
    WithdrawalType::Standard
}

/// Manual rejection of a pending withdrawal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectWithdrawalRequest {
    pub reason: String,
}

/// Evidence for a single-image AI verification.
///
/// The file itself is already in object storage; this carries its URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProofRequest {
    #[serde(alias = "url")]
    pub evidence_url: String,

    #[serde(default)]
    pub description: Option<String>,
}

/// Evidence for a hybrid (bills + scene photos) verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadHybridProofRequest {
    pub bill_image_urls: Vec<String>,

    #[serde(default)]
    pub scene_image_urls: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// Internal request to post a disbursement or adjustment to a wallet.
///
/// ## Example JSON
///
/// ```json
/// {
///     "amount": 2000000,
///     "transactionType": "WITHDRAWAL",
///     "description": "Payout for withdrawal 3f1c...",
///     "reference": "withdrawal:3f1c..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendTransactionRequest {
    pub amount: i64,
    pub transaction_type: TransactionType,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub reference: Option<String>,
}

/// Query parameters for paged listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageQuery {
    /// Maximum number of items to return.
    /// Default: 20, Max: 100
    #[serde(default = "default_limit")]
    pub limit: i64,

    /// Number of items to skip.
    /// Default: 0
    #[serde(default)]
    pub offset: i64,
}

impl PageQuery {
    /// Limit clamped to 1..=100 and a non-negative offset.
    pub fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, 100), self.offset.max(0))
    }
}

/// Query parameters for the withdrawal listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalQuery {
    pub status: Option<WithdrawalStatus>,

    #[serde(default = "default_limit")]
    pub limit: i64,

    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_accepts_provider_aliases() {
        let raw = r#"{"description":"CK TS1733660000000AB12CD34EF","amount":100000}"#;
        let parsed: PaymentWebhookRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.transfer_amount, 100_000);
        assert!(parsed.content.contains("TS1733660000000"));
    }

    #[test]
    fn test_withdrawal_type_defaults_to_standard() {
        let raw = r#"{"campaignId":"7c9e6679-7425-40de-944b-e07fc1f90ae7","amount":10,"reason":"r"}"#;
        let parsed: CreateWithdrawalRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.withdrawal_type, WithdrawalType::Standard);
        assert!(!parsed.quick);
    }

    #[test]
    fn test_page_query_clamped() {
        let query = PageQuery { limit: 1000, offset: -5 };
        assert_eq!(query.clamped(), (100, 0));
    }
}
