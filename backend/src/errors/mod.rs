//! # Service Errors
//!
//! [`AppError`] is what every service operation returns. Each variant has
//! a stable error code that API clients match on, and an HTTP status.
//!
//! | Kind | Codes | HTTP |
//! |------|-------|------|
//! | validation | `INVALID_DONATION_AMOUNT`, `INVALID_PAYMENT_REFERENCE`, `VALIDATION_ERROR` | 400 |
//! | not found | `CAMPAIGN_NOT_FOUND`, `DONATION_NOT_FOUND`, `WITHDRAWAL_NOT_FOUND`, ... | 404 |
//! | conflict | `INVALID_STATUS`, `QUICK_WITHDRAWAL_ALREADY_USED`, `WALLET_LOCKED`, ... | 409 |
//! | eligibility | `ELIGIBILITY_FAILED` | 403 |
//! | infrastructure | `CAMPAIGN_CREATION_FAILED`, `UPSTREAM_ERROR`, `BUS_ERROR`, `DATABASE_ERROR` | 5xx |
//!
//! Rejections (validation, not found, conflict) never leave side effects
//! behind, so a caller may inspect state and retry.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;
use uuid::Uuid;

use crate::bus::consumer::{HandlerError, ReplayError};
use crate::bus::BusError;
use crate::clients::ClientError;
use crate::db::{DatabaseError, LedgerWriteError};
use crate::models::ApiResponse;

#[derive(Error, Debug)]
pub enum AppError {
    // ---- ledger ----
    #[error("Wallet already exists for campaign {0}")]
    WalletAlreadyExists(Uuid),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Wallet {0} is locked")]
    WalletLocked(Uuid),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: i64, requested: i64 },

    // ---- campaigns ----
    #[error("Owner is not eligible to create a campaign: {0}")]
    EligibilityFailed(String),

    #[error("Campaign creation failed: {0}")]
    CampaignCreationFailed(String),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error("Campaign {0} is not accepting donations")]
    CampaignNotActive(Uuid),

    #[error("Campaign {0} is already closed")]
    CampaignAlreadyClosed(Uuid),

    // ---- donations ----
    #[error("Donation not found: {0}")]
    DonationNotFound(String),

    #[error("Invalid donation amount: {0}")]
    InvalidDonationAmount(String),

    #[error("No payment code in transfer description: {0}")]
    InvalidPaymentReference(String),

    // ---- withdrawals & proofs ----
    #[error("Campaign {0} has already used its quick withdrawal")]
    QuickWithdrawalAlreadyUsed(Uuid),

    #[error("Campaign {0} already has a withdrawal waiting for proof")]
    WithdrawalBlockedWaitingProof(Uuid),

    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(Uuid),

    #[error("Operation not allowed in status {0}")]
    InvalidStatus(String),

    #[error("Proof not found: {0}")]
    ProofNotFound(Uuid),

    #[error("Dead letter not found: {0}")]
    DeadLetterNotFound(Uuid),

    #[error("{0}")]
    Validation(String),

    // ---- infrastructure ----
    #[error("Collaborator call failed: {0}")]
    Upstream(String),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::WalletAlreadyExists(_) => "WALLET_ALREADY_EXISTS",
            Self::WalletNotFound(_) => "WALLET_NOT_FOUND",
            Self::WalletLocked(_) => "WALLET_LOCKED",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::EligibilityFailed(_) => "ELIGIBILITY_FAILED",
            Self::CampaignCreationFailed(_) => "CAMPAIGN_CREATION_FAILED",
            Self::CampaignNotFound(_) => "CAMPAIGN_NOT_FOUND",
            Self::CampaignNotActive(_) => "CAMPAIGN_NOT_ACTIVE",
            Self::CampaignAlreadyClosed(_) => "CAMPAIGN_ALREADY_CLOSED",
            Self::DonationNotFound(_) => "DONATION_NOT_FOUND",
            Self::InvalidDonationAmount(_) => "INVALID_DONATION_AMOUNT",
            Self::InvalidPaymentReference(_) => "INVALID_PAYMENT_REFERENCE",
            Self::QuickWithdrawalAlreadyUsed(_) => "QUICK_WITHDRAWAL_ALREADY_USED",
            Self::WithdrawalBlockedWaitingProof(_) => "WITHDRAWAL_BLOCKED_WAITING_PROOF",
            Self::WithdrawalNotFound(_) => "WITHDRAWAL_NOT_FOUND",
            Self::InvalidStatus(_) => "INVALID_STATUS",
            Self::ProofNotFound(_) => "PROOF_NOT_FOUND",
            Self::DeadLetterNotFound(_) => "DEAD_LETTER_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Bus(_) => "BUS_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error is a rejection of the request rather than a failure.
    pub fn is_rejection(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidDonationAmount(_)
            | Self::InvalidPaymentReference(_)
            | Self::Validation(_) => StatusCode::BAD_REQUEST,

            Self::EligibilityFailed(_) => StatusCode::FORBIDDEN,

            Self::WalletNotFound(_)
            | Self::CampaignNotFound(_)
            | Self::DonationNotFound(_)
            | Self::WithdrawalNotFound(_)
            | Self::ProofNotFound(_)
            | Self::DeadLetterNotFound(_) => StatusCode::NOT_FOUND,

            Self::WalletAlreadyExists(_)
            | Self::WalletLocked(_)
            | Self::InsufficientBalance { .. }
            | Self::CampaignNotActive(_)
            | Self::CampaignAlreadyClosed(_)
            | Self::QuickWithdrawalAlreadyUsed(_)
            | Self::WithdrawalBlockedWaitingProof(_)
            | Self::InvalidStatus(_) => StatusCode::CONFLICT,

            Self::Upstream(_) | Self::Bus(_) => StatusCode::BAD_GATEWAY,

            Self::CampaignCreationFailed(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiResponse::<()>::error(self.code(), &self.to_string()))
    }
}

impl From<LedgerWriteError> for AppError {
    fn from(e: LedgerWriteError) -> Self {
        match e {
            LedgerWriteError::WalletNotFound(id) => Self::WalletNotFound(id.to_string()),
            LedgerWriteError::WalletAlreadyExists(campaign_id) => Self::WalletAlreadyExists(campaign_id),
            LedgerWriteError::WalletLocked(id) => Self::WalletLocked(id),
            LedgerWriteError::InsufficientBalance { available, requested } => {
                Self::InsufficientBalance { available, requested }
            }
            LedgerWriteError::TailMoved(id) => {
                Self::Database(DatabaseError::Conflict(format!("chain of wallet {} kept moving", id)))
            }
            LedgerWriteError::DuplicateReference(reference) => {
                Self::Database(DatabaseError::Conflict(format!("duplicate ledger reference {}", reference)))
            }
            LedgerWriteError::Database(e) => Self::Database(e),
        }
    }
}

impl From<ClientError> for AppError {
    fn from(e: ClientError) -> Self {
        Self::Upstream(e.to_string())
    }
}

impl From<ReplayError> for AppError {
    fn from(e: ReplayError) -> Self {
        match e {
            ReplayError::NotFound(id) => Self::DeadLetterNotFound(id),
            ReplayError::AlreadyReplayed(id) => Self::InvalidStatus(format!("dead letter {} already replayed", id)),
            ReplayError::Bus(e) => Self::Bus(e),
            ReplayError::Database(e) => Self::Database(e),
        }
    }
}

/// Bus handlers retry failures and dead-letter rejections straight away.
impl From<AppError> for HandlerError {
    fn from(e: AppError) -> Self {
        if e.is_rejection() {
            Self::Permanent(format!("{}: {}", e.code(), e))
        } else {
            Self::Transient(format!("{}: {}", e.code(), e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let id = Uuid::new_v4();
        let err = AppError::QuickWithdrawalAlreadyUsed(id);
        assert_eq!(err.code(), "QUICK_WITHDRAWAL_ALREADY_USED");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.is_rejection());

        let err = AppError::InvalidDonationAmount("90000 != 100000".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = AppError::Database(DatabaseError::ConnectionError("pool exhausted".to_string()));
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_ledger_errors_keep_their_codes() {
        let id = Uuid::new_v4();
        let err: AppError = LedgerWriteError::WalletLocked(id).into();
        assert_eq!(err.code(), "WALLET_LOCKED");

        let err: AppError = LedgerWriteError::InsufficientBalance { available: 5, requested: 10 }.into();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
    }

    #[test]
    fn test_handler_error_classification() {
        let rejected: HandlerError = AppError::WalletLocked(Uuid::new_v4()).into();
        assert!(matches!(rejected, HandlerError::Permanent(_)));

        let failed: HandlerError = AppError::Database(DatabaseError::ConnectionError("down".to_string())).into();
        assert!(matches!(failed, HandlerError::Transient(_)));
    }
}
