//! # Chain Auditor Service
//!
//! Periodically re-verifies every wallet's hash chain and balance.
//!
//! ## Audit Flow
//!
//! ```text
//! Every N seconds:
//! 1. Page through all wallets (100 at a time)
//!               ↓
//! 2. For each wallet, Ledger::verify_chain()
//!               ↓
//! 3. If the chain is tampered or the balance drifted:
//!    a. Log the discrepancy
//!    b. Write a reconciliation log for a human
//! ```
//!
//! Nothing is repaired automatically. The chain is the record of what
//! happened; a mismatch means someone has to look at it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use crate::db::{ReconciliationLog, ReconciliationStore};
use crate::errors::AppError;
use crate::services::ledger::{ChainAudit, ChainIntegrity, Ledger};

const BATCH_SIZE: i64 = 100;

/// Summary of one audit pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditSummary {
    pub wallets_checked: usize,
    pub discrepancies: usize,
}

#[derive(Clone)]
pub struct ChainAuditor {
    ledger: Ledger,
    reconciliation: Arc<dyn ReconciliationStore>,
    interval_secs: u64,
}

impl ChainAuditor {
    pub fn new(ledger: Ledger, reconciliation: Arc<dyn ReconciliationStore>, interval_secs: u64) -> Self {
        Self {
            ledger,
            reconciliation,
            interval_secs,
        }
    }

    /// Run [`audit_all_wallets`](Self::audit_all_wallets) forever.
    ///
    /// Spawn it as a background task:
    ///
    /// ```rust,ignore
    /// tokio::spawn(async move { auditor.start_audit_loop().await });
    /// ```
    pub async fn start_audit_loop(&self) {
        info!("Starting chain audit loop (interval: {}s)", self.interval_secs);

        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            ticker.tick().await;

            info!("Running scheduled chain audit...");

            if let Err(e) = self.audit_all_wallets().await {
                error!("Chain audit failed: {}", e);
            }
        }
    }

    pub async fn audit_all_wallets(&self) -> Result<AuditSummary, AppError> {
        let mut summary = AuditSummary::default();
        let mut offset = 0;

        loop {
            let wallets = self.ledger.list_wallets(BATCH_SIZE, offset).await?;
            if wallets.is_empty() {
                break;
            }

            for wallet in &wallets {
                match self.ledger.verify_chain(wallet.id).await {
                    Ok(audit) => {
                        if !audit.is_valid {
                            summary.discrepancies += 1;
                            self.report(&audit).await;
                        }
                    }
                    Err(e) => warn!("Failed to audit wallet {}: {}", wallet.id, e),
                }
                summary.wallets_checked += 1;
            }

            offset += BATCH_SIZE;
        }

        info!(
            "Chain audit complete: checked {} wallets, found {} discrepancies",
            summary.wallets_checked, summary.discrepancies
        );
        Ok(summary)
    }

    async fn report(&self, audit: &ChainAudit) {
        let (category, details) = if audit.integrity == ChainIntegrity::Tampered {
            let sequences: Vec<String> = audit
                .invalid_entries
                .iter()
                .map(|e| format!("{} ({})", e.sequence, e.reason))
                .collect();
            ("CHAIN_TAMPERED", format!("Invalid entries: {}", sequences.join(", ")))
        } else {
            (
                "BALANCE_MISMATCH",
                format!(
                    "Cached balance {} but chain replays to {}",
                    audit.cached_balance, audit.calculated_balance
                ),
            )
        };

        error!("🚨 Wallet {} failed audit: {} - {}", audit.wallet_id, category, details);

        let log = ReconciliationLog::new(
            "wallet",
            audit.wallet_id,
            category,
            Some(audit.calculated_balance - audit.cached_balance),
            details,
        );
        if let Err(e) = self.reconciliation.record_reconciliation(&log).await {
            error!("Failed to record reconciliation log for wallet {}: {}", audit.wallet_id, e);
        }
    }
}
