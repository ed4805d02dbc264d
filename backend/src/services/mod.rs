//! # Services Module
//!
//! This module contains the core business logic of the fund ledger.
//! Each service handles a specific domain.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `Ledger` | Wallets, hash-chained entries, chain verification |
//! | `ChainAuditor` | Periodic verification of every chain |
//! | `CampaignService` | Creation saga, compensation, recovery, close |
//! | `DonationService` | Payment codes, webhook and callback settlement, fan-out |
//! | `WithdrawalService` | Withdrawal requests and their state machine |
//! | `ProofService` | Evidence upload and AI verdicts |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SERVICES LAYER                            │
//! │                                                                  │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐ │
//! │  │  Campaign    │   │  Donation    │   │ Withdrawal / Proof   │ │
//! │  │  Service     │   │  Service     │   │ Services             │ │
//! │  │ saga, close  │   │ webhook, fan │   │ state machine, AI    │ │
//! │  └──────┬───────┘   └──────┬───────┘   └──────────────────────┘ │
//! │         │                  │ donation-events                     │
//! │         ▼                  ▼                                     │
//! │  ┌──────────────────────────────────┐   ┌────────────────────┐  │
//! │  │              Ledger              │◄──│   ChainAuditor     │  │
//! │  │  wallets • append • verify_chain │   │   (background)     │  │
//! │  └──────────────────────────────────┘   └────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod campaign_saga;
pub mod chain_auditor;
pub mod donation;
pub mod ledger;
pub mod proof;
pub mod withdrawal;

pub use campaign_saga::CampaignService;
pub use chain_auditor::ChainAuditor;
pub use donation::{DonationEventHandler, DonationService};
pub use ledger::Ledger;
pub use proof::{ProofResultHandler, ProofService};
pub use withdrawal::WithdrawalService;
