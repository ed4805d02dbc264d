//! # Database Models
//!
//! This module defines the data structures that map to database tables.
//! Each struct represents a row in a table.
//!
//! ## Table Overview
//!
//! | Table | Description |
//! |-------|-------------|
//! | `campaigns` | Campaign read-model (amount running total, quick-withdrawal flag) |
//! | `wallets` | One wallet per campaign, balance of record |
//! | `ledger_entries` | Append-only, hash-chained fund movements |
//! | `donations` | Donation lifecycle (PENDING → COMPLETED) |
//! | `processed_events` | Idempotency markers |
//! | `withdrawal_requests` | Withdrawal state machine |
//! | `proofs` | Proof-of-use evidence and AI verdicts |
//! | `dead_letters` | Bus messages that exhausted their retries |
//! | `reconciliation_logs` | Failures that need a human |
//!
//! ## Relationship Diagram
//!
//! ```text
//! ┌─────────────┐ 1   1 ┌──────────────┐ 1   * ┌──────────────────┐
//! │  campaigns  │──────│   wallets    │──────<│  ledger_entries  │
//! │             │       │              │       │ previous_hash ──┐│
//! └─────────────┘       └──────────────┘       │ hash <──────────┘│
//!    │       │                                 └──────────────────┘
//!    │ 1   * │ 1   *
//!    ▼       ▼
//! ┌──────────┐ ┌─────────────────────┐ 1   * ┌──────────┐
//! │donations │ │ withdrawal_requests │──────<│  proofs  │
//! └──────────┘ └─────────────────────┘       └──────────┘
//! ```
//!
//! ## Note on Types
//!
//! Amounts are `i64` minor units because PostgreSQL has no unsigned
//! integers. Statuses are stored as upper-case text and parsed back into
//! the enums below.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when a stored status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Generates `as_str`, `Display` and `FromStr` for a text-backed enum.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ============================================
// CAMPAIGNS
// ============================================

/// Campaign lifecycle.
///
/// `DRAFT` only exists in memory while the owner is being validated;
/// the first persisted state is `PENDING`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Pending,
    Active,
    Closed,
}

text_enum!(CampaignStatus, "campaign status", {
    Draft => "DRAFT",
    Pending => "PENDING",
    Active => "ACTIVE",
    Closed => "CLOSED",
});

/// Campaign read-model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    pub description: String,

    /// Fundraising goal in minor units.
    pub target_amount: i64,

    /// Running total of confirmed donations.
    pub current_amount: i64,

    pub currency: String,
    pub status: CampaignStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    /// One-shot allowance; flips false → true exactly once.
    pub has_used_quick_withdrawal: bool,

    pub like_count: i64,
    pub view_count: i64,
    pub comment_count: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignRecord {
    /// How much more the campaign can accept before reaching its target.
    pub fn remaining_need(&self) -> i64 {
        (self.target_amount - self.current_amount).max(0)
    }
}

// ============================================
// WALLETS & LEDGER
// ============================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletStatus {
    Active,
    Locked,
}

text_enum!(WalletStatus, "wallet status", {
    Active => "ACTIVE",
    Locked => "LOCKED",
});

/// Wallet of record for one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,

    /// Current balance. Only the ledger append path changes it.
    pub balance: i64,

    /// Lifetime total of all deposits.
    pub total_deposits: i64,

    /// Lifetime total of all withdrawals.
    pub total_withdrawals: i64,

    pub currency: String,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Funds credited to the wallet
    Deposit,
    /// Funds debited from the wallet
    Withdrawal,
}

text_enum!(TransactionType, "transaction type", {
    Deposit => "DEPOSIT",
    Withdrawal => "WITHDRAWAL",
});

impl TransactionType {
    /// Signed balance change for `amount`.
    pub fn signed(&self, amount: i64) -> i64 {
        match self {
            Self::Deposit => amount,
            Self::Withdrawal => -amount,
        }
    }
}

/// Status of a ledger entry. Entries are only written once confirmed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Confirmed,
}

text_enum!(TransactionStatus, "transaction status", {
    Confirmed => "CONFIRMED",
});

/// One immutable, hash-chained fund movement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntryRecord {
    pub id: Uuid,
    pub wallet_id: Uuid,

    /// Position in the wallet's chain, starting at 0.
    pub sequence: i64,

    /// Always positive; direction comes from `tx_type`.
    pub amount: i64,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub description: String,

    /// Caller-supplied identity of the movement (e.g. `donation:<id>`).
    /// Unique per wallet.
    pub reference: Option<String>,

    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,

    /// Which chain secret produced `hash`.
    pub secret_version: i32,

    /// Wallet balance right after this entry was applied.
    pub balance_after: i64,
}

/// Hash and position of the newest entry in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTail {
    pub sequence: i64,
    pub hash: String,
}

/// An entry ready to be appended; the store fills in `balance_after`.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub sequence: i64,
    pub amount: i64,
    pub tx_type: TransactionType,
    pub description: String,
    pub reference: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
    pub secret_version: i32,
}

impl NewLedgerEntry {
    pub fn into_record(self, balance_after: i64) -> LedgerEntryRecord {
        LedgerEntryRecord {
            id: self.id,
            wallet_id: self.wallet_id,
            sequence: self.sequence,
            amount: self.amount,
            tx_type: self.tx_type,
            status: TransactionStatus::Confirmed,
            description: self.description,
            reference: self.reference,
            timestamp: self.timestamp,
            previous_hash: self.previous_hash,
            hash: self.hash,
            secret_version: self.secret_version,
            balance_after,
        }
    }
}

// ============================================
// DONATIONS
// ============================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DonationStatus {
    Pending,
    Completed,
}

text_enum!(DonationStatus, "donation status", {
    Pending => "PENDING",
    Completed => "COMPLETED",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonationRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub donor_name: String,
    pub donor_email: Option<String>,
    pub message: Option<String>,
    pub amount: i64,

    /// Code the donor puts in the transfer description.
    pub payment_code: String,

    pub status: DonationStatus,

    /// Bank transaction id or ledger entry hash that confirmed the donation.
    pub external_ref: Option<String>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of the atomic "settle + mark processed" write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementWrite {
    /// Donation updated and marker inserted in one transaction.
    Applied,
    /// A marker for this settlement already existed; nothing changed.
    AlreadyProcessed,
}

// ============================================
// WITHDRAWALS & PROOFS
// ============================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalType {
    Standard,
    Emergency,
    Quick,
}

text_enum!(WithdrawalType, "withdrawal type", {
    Standard => "STANDARD",
    Emergency => "EMERGENCY",
    Quick => "QUICK",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Pending,
    WaitingProof,
    Approved,
    Rejected,
}

text_enum!(WithdrawalStatus, "withdrawal status", {
    Pending => "PENDING",
    WaitingProof => "WAITING_PROOF",
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

impl WithdrawalStatus {
    /// Statuses that count as "in flight" for the one-at-a-time rule.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::WaitingProof | Self::Approved)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub amount: i64,
    pub reason: String,
    pub withdrawal_type: WithdrawalType,

    /// Whether this request consumed the campaign's quick-withdrawal flag.
    pub quick: bool,

    pub status: WithdrawalStatus,

    /// Rejection reason or other review notes.
    pub verification_result: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofType {
    Invoice,
    Selfie,
}

text_enum!(ProofType, "proof type", {
    Invoice => "INVOICE",
    Selfie => "SELFIE",
});

impl ProofType {
    /// Emergency withdrawals are evidenced by a selfie, everything else by an invoice.
    pub fn for_withdrawal(withdrawal_type: WithdrawalType) -> Self {
        match withdrawal_type {
            WithdrawalType::Emergency => Self::Selfie,
            WithdrawalType::Standard | WithdrawalType::Quick => Self::Invoice,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AiStatus {
    Processing,
    Verified,
    Rejected,
}

text_enum!(AiStatus, "ai status", {
    Processing => "PROCESSING",
    Verified => "VERIFIED",
    Rejected => "REJECTED",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofRecord {
    pub id: Uuid,
    pub withdrawal_id: Uuid,

    /// Primary evidence (bill photo, selfie, ...).
    pub evidence_url: String,

    /// Extra images sent with a hybrid verification request.
    pub supporting_urls: Vec<String>,

    pub description: Option<String>,
    pub proof_type: ProofType,
    pub ai_status: AiStatus,

    /// Trust score 0-100, present once a verdict arrived.
    pub ai_score: Option<i32>,
    pub ai_analysis: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written when an AI verdict is applied to a proof.
#[derive(Debug, Clone, PartialEq)]
pub struct ProofVerdict {
    pub ai_status: AiStatus,
    pub ai_score: i32,
    pub ai_analysis: String,
}

/// Result of the atomic "apply verdict + mark event processed" write.
#[derive(Debug, Clone)]
pub enum VerdictWrite {
    Applied(ProofRecord),
    Duplicate,
    ProofNotFound,
}

// ============================================
// DEAD LETTERS & RECONCILIATION
// ============================================

/// A bus message that could not be handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub topic: String,
    pub partition_key: String,
    pub payload: serde_json::Value,
    pub error: String,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub replayed_at: Option<DateTime<Utc>>,
}

/// Something that failed outside a transaction and needs manual follow-up.
///
/// Written by saga compensation, settlement fan-out failures and the
/// chain auditor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationLog {
    pub id: Uuid,

    /// What kind of entity is affected ("campaign", "wallet", "donation", ...).
    pub entity_type: String,
    pub entity_id: String,

    /// Short machine-readable category, e.g. `COMPENSATION_FAILED`.
    pub category: String,

    pub amount: Option<i64>,
    pub details: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationLog {
    pub fn new(
        entity_type: &str,
        entity_id: impl ToString,
        category: &str,
        amount: Option<i64>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            category: category.to_string(),
            amount,
            details: details.into(),
            resolved: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_round_trip() {
        assert_eq!("WAITING_PROOF".parse::<WithdrawalStatus>().unwrap(), WithdrawalStatus::WaitingProof);
        assert_eq!(WithdrawalStatus::WaitingProof.as_str(), "WAITING_PROOF");
        assert!("waiting_proof".parse::<WithdrawalStatus>().is_err());
    }

    #[test]
    fn test_proof_type_follows_withdrawal_type() {
        assert_eq!(ProofType::for_withdrawal(WithdrawalType::Emergency), ProofType::Selfie);
        assert_eq!(ProofType::for_withdrawal(WithdrawalType::Standard), ProofType::Invoice);
        assert_eq!(ProofType::for_withdrawal(WithdrawalType::Quick), ProofType::Invoice);
    }

    #[test]
    fn test_remaining_need_never_negative() {
        let now = Utc::now();
        let campaign = CampaignRecord {
            id: Uuid::new_v4(),
            owner_id: "owner".to_string(),
            title: "t".to_string(),
            description: String::new(),
            target_amount: 100,
            current_amount: 150,
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
        assert_eq!(campaign.remaining_need(), 0);
    }

    #[test]
    fn test_signed_amount() {
        assert_eq!(TransactionType::Deposit.signed(10), 10);
        assert_eq!(TransactionType::Withdrawal.signed(10), -10);
    }
}
