//! # Database Queries
//!
//! This module contains all the SQL queries for interacting with the database.
//! Each function performs a specific database operation.
//!
//! ## Query Organization
//!
//! Queries are grouped by the table they operate on:
//! - `campaign_*` - Campaign read-model
//! - `wallet_*` / `entry_*` - Wallets and the hash-chained ledger
//! - `donation_*` - Donations and settlement
//! - `withdrawal_*` / `proof_*` - Withdrawal state machine and proofs
//! - `dead_letter_*` / `reconciliation_*` - Operational records
//!
//! ## Error Handling
//!
//! All queries return `Result<T, DatabaseError>` (ledger writes return
//! `LedgerWriteError`). Unique-constraint violations are turned into
//! `DatabaseError::Conflict` or the matching ledger error.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::*;
use super::store::LedgerWriteError;
use super::DatabaseError;

macro_rules! campaign_columns {
    () => {
        "id, owner_id, title, description, target_amount, current_amount, currency, status, \
         start_date, end_date, has_used_quick_withdrawal, like_count, view_count, comment_count, \
         created_at, updated_at"
    };
}

macro_rules! wallet_columns {
    () => {
        "id, campaign_id, balance, total_deposits, total_withdrawals, currency, status, created_at, updated_at"
    };
}

macro_rules! entry_columns {
    () => {
        "id, wallet_id, sequence, amount, tx_type, status, description, reference, timestamp, \
         previous_hash, hash, secret_version, balance_after"
    };
}

macro_rules! donation_columns {
    () => {
        "id, campaign_id, donor_name, donor_email, message, amount, payment_code, status, \
         external_ref, created_at, completed_at"
    };
}

macro_rules! withdrawal_columns {
    () => {
        "id, campaign_id, amount, reason, withdrawal_type, quick, status, verification_result, \
         created_at, updated_at"
    };
}

macro_rules! proof_columns {
    () => {
        "id, withdrawal_id, evidence_url, supporting_urls, description, proof_type, ai_status, \
         ai_score, ai_analysis, created_at, updated_at"
    };
}

// ============================================
// HELPER FUNCTIONS
// ============================================

async fn get_client(pool: &Pool) -> Result<deadpool_postgres::Object, DatabaseError> {
    pool.get().await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
}

fn is_unique_violation(error: &tokio_postgres::Error) -> bool {
    error.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

/// Read a text column into one of the status enums.
fn parse_column<T>(row: &Row, column: &str) -> Result<T, DatabaseError>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.get(column);
    raw.parse()
        .map_err(|e: UnknownVariant| DatabaseError::DecodeError(format!("{}.{}", column, e)))
}

fn row_to_campaign(row: &Row) -> Result<CampaignRecord, DatabaseError> {
    Ok(CampaignRecord {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        description: row.get("description"),
        target_amount: row.get("target_amount"),
        current_amount: row.get("current_amount"),
        currency: row.get("currency"),
        status: parse_column(row, "status")?,
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        has_used_quick_withdrawal: row.get("has_used_quick_withdrawal"),
        like_count: row.get("like_count"),
        view_count: row.get("view_count"),
        comment_count: row.get("comment_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_wallet(row: &Row) -> Result<WalletRecord, DatabaseError> {
    Ok(WalletRecord {
        id: row.get("id"),
        campaign_id: row.get("campaign_id"),
        balance: row.get("balance"),
        total_deposits: row.get("total_deposits"),
        total_withdrawals: row.get("total_withdrawals"),
        currency: row.get("currency"),
        status: parse_column(row, "status")?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_entry(row: &Row) -> Result<LedgerEntryRecord, DatabaseError> {
    Ok(LedgerEntryRecord {
        id: row.get("id"),
        wallet_id: row.get("wallet_id"),
        sequence: row.get("sequence"),
        amount: row.get("amount"),
        tx_type: parse_column(row, "tx_type")?,
        status: parse_column(row, "status")?,
        description: row.get("description"),
        reference: row.get("reference"),
        timestamp: row.get("timestamp"),
        previous_hash: row.get("previous_hash"),
        hash: row.get("hash"),
        secret_version: row.get("secret_version"),
        balance_after: row.get("balance_after"),
    })
}

fn row_to_donation(row: &Row) -> Result<DonationRecord, DatabaseError> {
    Ok(DonationRecord {
        id: row.get("id"),
        campaign_id: row.get("campaign_id"),
        donor_name: row.get("donor_name"),
        donor_email: row.get("donor_email"),
        message: row.get("message"),
        amount: row.get("amount"),
        payment_code: row.get("payment_code"),
        status: parse_column(row, "status")?,
        external_ref: row.get("external_ref"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
    })
}

fn row_to_withdrawal(row: &Row) -> Result<WithdrawalRecord, DatabaseError> {
    Ok(WithdrawalRecord {
        id: row.get("id"),
        campaign_id: row.get("campaign_id"),
        amount: row.get("amount"),
        reason: row.get("reason"),
        withdrawal_type: parse_column(row, "withdrawal_type")?,
        quick: row.get("quick"),
        status: parse_column(row, "status")?,
        verification_result: row.get("verification_result"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_proof(row: &Row) -> Result<ProofRecord, DatabaseError> {
    Ok(ProofRecord {
        id: row.get("id"),
        withdrawal_id: row.get("withdrawal_id"),
        evidence_url: row.get("evidence_url"),
        supporting_urls: row.get("supporting_urls"),
        description: row.get("description"),
        proof_type: parse_column(row, "proof_type")?,
        ai_status: parse_column(row, "ai_status")?,
        ai_score: row.get("ai_score"),
        ai_analysis: row.get("ai_analysis"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_dead_letter(row: &Row) -> DeadLetterRecord {
    DeadLetterRecord {
        id: row.get("id"),
        topic: row.get("topic"),
        partition_key: row.get("partition_key"),
        payload: row.get("payload"),
        error: row.get("error"),
        attempts: row.get("attempts"),
        created_at: row.get("created_at"),
        replayed_at: row.get("replayed_at"),
    }
}

fn row_to_reconciliation(row: &Row) -> ReconciliationLog {
    ReconciliationLog {
        id: row.get("id"),
        entity_type: row.get("entity_type"),
        entity_id: row.get("entity_id"),
        category: row.get("category"),
        amount: row.get("amount"),
        details: row.get("details"),
        resolved: row.get("resolved"),
        created_at: row.get("created_at"),
    }
}

fn collect<T>(rows: &[Row], f: fn(&Row) -> Result<T, DatabaseError>) -> Result<Vec<T>, DatabaseError> {
    rows.iter().map(f).collect()
}

// ============================================
// CAMPAIGN QUERIES
// ============================================

pub async fn insert_campaign(pool: &Pool, campaign: &CampaignRecord) -> Result<(), DatabaseError> {
    debug!("Inserting campaign {}", campaign.id);

    let client = get_client(pool).await?;
    client.execute(
        concat!("INSERT INTO campaigns (", campaign_columns!(), ") \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"),
        &[
            &campaign.id,
            &campaign.owner_id,
            &campaign.title,
            &campaign.description,
            &campaign.target_amount,
            &campaign.current_amount,
            &campaign.currency,
            &campaign.status.as_str(),
            &campaign.start_date,
            &campaign.end_date,
            &campaign.has_used_quick_withdrawal,
            &campaign.like_count,
            &campaign.view_count,
            &campaign.comment_count,
            &campaign.created_at,
            &campaign.updated_at,
        ],
    ).await?;

    Ok(())
}

pub async fn get_campaign(pool: &Pool, id: Uuid) -> Result<Option<CampaignRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt(
        concat!("SELECT ", campaign_columns!(), " FROM campaigns WHERE id = $1"),
        &[&id],
    ).await?;

    row.as_ref().map(row_to_campaign).transpose()
}

pub async fn list_campaigns(pool: &Pool, limit: i64, offset: i64) -> Result<Vec<CampaignRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let rows = client.query(
        concat!("SELECT ", campaign_columns!(), " FROM campaigns ORDER BY created_at DESC LIMIT $1 OFFSET $2"),
        &[&limit, &offset],
    ).await?;

    collect(&rows, row_to_campaign)
}

/// Oldest first, so recovery works through the backlog in order.
pub async fn list_campaigns_by_status(
    pool: &Pool,
    status: CampaignStatus,
    limit: i64,
) -> Result<Vec<CampaignRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let rows = client.query(
        concat!("SELECT ", campaign_columns!(), " FROM campaigns WHERE status = $1 ORDER BY updated_at ASC LIMIT $2"),
        &[&status.as_str(), &limit],
    ).await?;

    collect(&rows, row_to_campaign)
}

pub async fn update_campaign_status(
    pool: &Pool,
    id: Uuid,
    from: CampaignStatus,
    to: CampaignStatus,
) -> Result<bool, DatabaseError> {
    let client = get_client(pool).await?;
    let updated = client.execute(
        "UPDATE campaigns SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        &[&id, &from.as_str(), &to.as_str()],
    ).await?;

    debug!("Campaign {} status {} -> {}: {} row(s)", id, from, to, updated);
    Ok(updated == 1)
}

pub async fn delete_campaign(pool: &Pool, id: Uuid) -> Result<bool, DatabaseError> {
    let client = get_client(pool).await?;
    let deleted = client.execute("DELETE FROM campaigns WHERE id = $1", &[&id]).await?;
    Ok(deleted == 1)
}

pub async fn increment_campaign_amount(pool: &Pool, id: Uuid, amount: i64) -> Result<Option<i64>, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt(
        "UPDATE campaigns SET current_amount = current_amount + $2, updated_at = NOW() \
         WHERE id = $1 RETURNING current_amount",
        &[&id, &amount],
    ).await?;

    Ok(row.map(|r| r.get("current_amount")))
}

/// Conditional update; exactly one concurrent caller can see `true`.
pub async fn claim_quick_withdrawal(pool: &Pool, id: Uuid) -> Result<bool, DatabaseError> {
    let client = get_client(pool).await?;
    let updated = client.execute(
        "UPDATE campaigns SET has_used_quick_withdrawal = TRUE, updated_at = NOW() \
         WHERE id = $1 AND has_used_quick_withdrawal = FALSE",
        &[&id],
    ).await?;

    Ok(updated == 1)
}

pub async fn release_quick_withdrawal(pool: &Pool, id: Uuid) -> Result<bool, DatabaseError> {
    let client = get_client(pool).await?;
    let updated = client.execute(
        "UPDATE campaigns SET has_used_quick_withdrawal = FALSE, updated_at = NOW() \
         WHERE id = $1 AND has_used_quick_withdrawal = TRUE",
        &[&id],
    ).await?;

    Ok(updated == 1)
}

// ============================================
// WALLET & LEDGER QUERIES
// ============================================

pub async fn insert_wallet(pool: &Pool, wallet: &WalletRecord) -> Result<(), LedgerWriteError> {
    let client = get_client(pool).await?;
    let result = client.execute(
        concat!("INSERT INTO wallets (", wallet_columns!(), ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"),
        &[
            &wallet.id,
            &wallet.campaign_id,
            &wallet.balance,
            &wallet.total_deposits,
            &wallet.total_withdrawals,
            &wallet.currency,
            &wallet.status.as_str(),
            &wallet.created_at,
            &wallet.updated_at,
        ],
    ).await;

    match result {
        Ok(_) => {
            info!("Wallet {} created for campaign {}", wallet.id, wallet.campaign_id);
            Ok(())
        }
        Err(e) if is_unique_violation(&e) => Err(LedgerWriteError::WalletAlreadyExists(wallet.campaign_id)),
        Err(e) => Err(DatabaseError::from(e).into()),
    }
}

pub async fn get_wallet(pool: &Pool, id: Uuid) -> Result<Option<WalletRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt(
        concat!("SELECT ", wallet_columns!(), " FROM wallets WHERE id = $1"),
        &[&id],
    ).await?;

    row.as_ref().map(row_to_wallet).transpose()
}

pub async fn get_wallet_by_campaign(pool: &Pool, campaign_id: Uuid) -> Result<Option<WalletRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt(
        concat!("SELECT ", wallet_columns!(), " FROM wallets WHERE campaign_id = $1"),
        &[&campaign_id],
    ).await?;

    row.as_ref().map(row_to_wallet).transpose()
}

pub async fn list_wallets(pool: &Pool, limit: i64, offset: i64) -> Result<Vec<WalletRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let rows = client.query(
        concat!("SELECT ", wallet_columns!(), " FROM wallets ORDER BY created_at ASC LIMIT $1 OFFSET $2"),
        &[&limit, &offset],
    ).await?;

    collect(&rows, row_to_wallet)
}

pub async fn set_wallet_status(pool: &Pool, id: Uuid, status: WalletStatus) -> Result<bool, DatabaseError> {
    let client = get_client(pool).await?;
    let updated = client.execute(
        "UPDATE wallets SET status = $2, updated_at = NOW() WHERE id = $1",
        &[&id, &status.as_str()],
    ).await?;

    Ok(updated == 1)
}

pub async fn get_chain_tail(pool: &Pool, wallet_id: Uuid) -> Result<Option<ChainTail>, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt(
        "SELECT sequence, hash FROM ledger_entries WHERE wallet_id = $1 ORDER BY sequence DESC LIMIT 1",
        &[&wallet_id],
    ).await?;

    Ok(row.map(|r| ChainTail {
        sequence: r.get("sequence"),
        hash: r.get("hash"),
    }))
}

pub async fn find_entry_by_reference(
    pool: &Pool,
    wallet_id: Uuid,
    reference: &str,
) -> Result<Option<LedgerEntryRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt(
        concat!("SELECT ", entry_columns!(), " FROM ledger_entries WHERE wallet_id = $1 AND reference = $2"),
        &[&wallet_id, &reference],
    ).await?;

    row.as_ref().map(row_to_entry).transpose()
}

/// Append one entry and move the wallet balance.
///
/// Runs in a single transaction holding a row lock on the wallet:
///
/// ```text
/// SELECT wallet FOR UPDATE ──► status ACTIVE? ──► reference unused?
///        ──► tail == entry.previous_hash? ──► balance stays >= 0?
///        ──► INSERT entry ──► UPDATE wallet ──► COMMIT
/// ```
pub async fn append_ledger_entry(pool: &Pool, entry: NewLedgerEntry) -> Result<LedgerEntryRecord, LedgerWriteError> {
    let mut client = get_client(pool).await?;
    let tx = client.transaction().await.map_err(DatabaseError::from)?;

    let wallet = tx.query_opt(
        "SELECT balance, status FROM wallets WHERE id = $1 FOR UPDATE",
        &[&entry.wallet_id],
    ).await.map_err(DatabaseError::from)?
        .ok_or(LedgerWriteError::WalletNotFound(entry.wallet_id))?;

    let balance: i64 = wallet.get("balance");
    let status: WalletStatus = parse_column(&wallet, "status")?;
    if status != WalletStatus::Active {
        return Err(LedgerWriteError::WalletLocked(entry.wallet_id));
    }

    if let Some(reference) = &entry.reference {
        let existing = tx.query_opt(
            "SELECT 1 FROM ledger_entries WHERE wallet_id = $1 AND reference = $2",
            &[&entry.wallet_id, reference],
        ).await.map_err(DatabaseError::from)?;
        if existing.is_some() {
            return Err(LedgerWriteError::DuplicateReference(reference.clone()));
        }
    }

    let tail = tx.query_opt(
        "SELECT sequence, hash FROM ledger_entries WHERE wallet_id = $1 ORDER BY sequence DESC LIMIT 1",
        &[&entry.wallet_id],
    ).await.map_err(DatabaseError::from)?;

    let tail_matches = match &tail {
        None => entry.sequence == 0,
        Some(row) => {
            let sequence: i64 = row.get("sequence");
            let hash: String = row.get("hash");
            hash == entry.previous_hash && sequence + 1 == entry.sequence
        }
    };
    if !tail_matches {
        warn!("Chain tail of wallet {} moved, rejecting append", entry.wallet_id);
        return Err(LedgerWriteError::TailMoved(entry.wallet_id));
    }

    let new_balance = balance + entry.tx_type.signed(entry.amount);
    if new_balance < 0 {
        return Err(LedgerWriteError::InsufficientBalance {
            available: balance,
            requested: entry.amount,
        });
    }

    let inserted = tx.execute(
        concat!("INSERT INTO ledger_entries (", entry_columns!(), ") \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"),
        &[
            &entry.id,
            &entry.wallet_id,
            &entry.sequence,
            &entry.amount,
            &entry.tx_type.as_str(),
            &TransactionStatus::Confirmed.as_str(),
            &entry.description,
            &entry.reference,
            &entry.timestamp,
            &entry.previous_hash,
            &entry.hash,
            &entry.secret_version,
            &new_balance,
        ],
    ).await;
    if let Err(e) = inserted {
        if is_unique_violation(&e) {
            return Err(LedgerWriteError::TailMoved(entry.wallet_id));
        }
        return Err(DatabaseError::from(e).into());
    }

    let (deposit, withdrawal) = match entry.tx_type {
        TransactionType::Deposit => (entry.amount, 0i64),
        TransactionType::Withdrawal => (0i64, entry.amount),
    };
    tx.execute(
        "UPDATE wallets SET balance = $2, total_deposits = total_deposits + $3, \
         total_withdrawals = total_withdrawals + $4, updated_at = NOW() WHERE id = $1",
        &[&entry.wallet_id, &new_balance, &deposit, &withdrawal],
    ).await.map_err(DatabaseError::from)?;

    tx.commit().await.map_err(DatabaseError::from)?;

    debug!(
        "Appended entry #{} to wallet {} (balance {})",
        entry.sequence, entry.wallet_id, new_balance
    );
    Ok(entry.into_record(new_balance))
}

pub async fn list_ledger_entries(pool: &Pool, wallet_id: Uuid) -> Result<Vec<LedgerEntryRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let rows = client.query(
        concat!("SELECT ", entry_columns!(), " FROM ledger_entries WHERE wallet_id = $1 ORDER BY sequence ASC"),
        &[&wallet_id],
    ).await?;

    collect(&rows, row_to_entry)
}

pub async fn list_ledger_entries_page(
    pool: &Pool,
    wallet_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<LedgerEntryRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let rows = client.query(
        concat!("SELECT ", entry_columns!(), " FROM ledger_entries WHERE wallet_id = $1 \
                 ORDER BY sequence DESC LIMIT $2 OFFSET $3"),
        &[&wallet_id, &limit, &offset],
    ).await?;

    collect(&rows, row_to_entry)
}

// ============================================
// DONATION & IDEMPOTENCY QUERIES
// ============================================

pub async fn insert_donation(pool: &Pool, donation: &DonationRecord) -> Result<(), DatabaseError> {
    let client = get_client(pool).await?;
    let result = client.execute(
        concat!("INSERT INTO donations (", donation_columns!(), ") \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"),
        &[
            &donation.id,
            &donation.campaign_id,
            &donation.donor_name,
            &donation.donor_email,
            &donation.message,
            &donation.amount,
            &donation.payment_code,
            &donation.status.as_str(),
            &donation.external_ref,
            &donation.created_at,
            &donation.completed_at,
        ],
    ).await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(DatabaseError::Conflict(format!(
            "payment code {} already issued",
            donation.payment_code
        ))),
        Err(e) => Err(e.into()),
    }
}

pub async fn get_donation(pool: &Pool, id: Uuid) -> Result<Option<DonationRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt(
        concat!("SELECT ", donation_columns!(), " FROM donations WHERE id = $1"),
        &[&id],
    ).await?;

    row.as_ref().map(row_to_donation).transpose()
}

pub async fn get_donation_by_payment_code(pool: &Pool, code: &str) -> Result<Option<DonationRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt(
        concat!("SELECT ", donation_columns!(), " FROM donations WHERE payment_code = $1"),
        &[&code],
    ).await?;

    row.as_ref().map(row_to_donation).transpose()
}

pub async fn list_donations_by_campaign(
    pool: &Pool,
    campaign_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<DonationRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let rows = client.query(
        concat!("SELECT ", donation_columns!(), " FROM donations WHERE campaign_id = $1 \
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3"),
        &[&campaign_id, &limit, &offset],
    ).await?;

    collect(&rows, row_to_donation)
}

pub async fn mark_donation_completed(pool: &Pool, id: Uuid) -> Result<bool, DatabaseError> {
    let client = get_client(pool).await?;
    let updated = client.execute(
        "UPDATE donations SET status = 'COMPLETED', completed_at = NOW() WHERE id = $1 AND status = 'PENDING'",
        &[&id],
    ).await?;

    Ok(updated == 1)
}

/// Marker insert and donation update in one transaction.
pub async fn complete_settlement(
    pool: &Pool,
    settlement_id: &str,
    donation_id: Uuid,
    external_ref: &str,
) -> Result<SettlementWrite, DatabaseError> {
    let mut client = get_client(pool).await?;
    let tx = client.transaction().await?;

    let marked = tx.execute(
        "INSERT INTO processed_events (event_id, processed_at) VALUES ($1, NOW()) ON CONFLICT (event_id) DO NOTHING",
        &[&settlement_id],
    ).await?;
    if marked == 0 {
        debug!("Settlement {} already processed", settlement_id);
        return Ok(SettlementWrite::AlreadyProcessed);
    }

    let updated = tx.execute(
        "UPDATE donations SET status = 'COMPLETED', external_ref = $2, \
         completed_at = COALESCE(completed_at, NOW()) WHERE id = $1",
        &[&donation_id, &external_ref],
    ).await?;
    if updated == 0 {
        // Dropping the transaction rolls the marker back.
        return Err(DatabaseError::NotFound(format!("donation {}", donation_id)));
    }

    tx.commit().await?;
    Ok(SettlementWrite::Applied)
}

pub async fn count_completed_donations(pool: &Pool, campaign_id: Uuid) -> Result<i64, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_one(
        "SELECT COUNT(*) AS total FROM donations WHERE campaign_id = $1 AND status = 'COMPLETED'",
        &[&campaign_id],
    ).await?;

    Ok(row.get("total"))
}

pub async fn list_unsettled_donations(
    pool: &Pool,
    completed_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<DonationRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let rows = client.query(
        concat!("SELECT ", donation_columns!(), " FROM donations \
                 WHERE status = 'COMPLETED' AND external_ref IS NULL AND completed_at <= $1 \
                 ORDER BY completed_at LIMIT $2"),
        &[&completed_before, &limit],
    ).await?;

    collect(&rows, row_to_donation)
}

pub async fn is_event_processed(pool: &Pool, event_id: &str) -> Result<bool, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt("SELECT 1 FROM processed_events WHERE event_id = $1", &[&event_id]).await?;
    Ok(row.is_some())
}

pub async fn mark_event_processed(pool: &Pool, event_id: &str) -> Result<bool, DatabaseError> {
    let client = get_client(pool).await?;
    let inserted = client.execute(
        "INSERT INTO processed_events (event_id, processed_at) VALUES ($1, NOW()) ON CONFLICT (event_id) DO NOTHING",
        &[&event_id],
    ).await?;
    Ok(inserted == 1)
}

// ============================================
// WITHDRAWAL QUERIES
// ============================================

pub async fn insert_withdrawal(pool: &Pool, withdrawal: &WithdrawalRecord) -> Result<(), DatabaseError> {
    let client = get_client(pool).await?;
    let result = client.execute(
        concat!("INSERT INTO withdrawal_requests (", withdrawal_columns!(), ") \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"),
        &[
            &withdrawal.id,
            &withdrawal.campaign_id,
            &withdrawal.amount,
            &withdrawal.reason,
            &withdrawal.withdrawal_type.as_str(),
            &withdrawal.quick,
            &withdrawal.status.as_str(),
            &withdrawal.verification_result,
            &withdrawal.created_at,
            &withdrawal.updated_at,
        ],
    ).await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(DatabaseError::Conflict(format!(
            "campaign {} already has a withdrawal in flight",
            withdrawal.campaign_id
        ))),
        Err(e) => Err(e.into()),
    }
}

pub async fn get_withdrawal(pool: &Pool, id: Uuid) -> Result<Option<WithdrawalRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt(
        concat!("SELECT ", withdrawal_columns!(), " FROM withdrawal_requests WHERE id = $1"),
        &[&id],
    ).await?;

    row.as_ref().map(row_to_withdrawal).transpose()
}

pub async fn has_in_flight_withdrawal(pool: &Pool, campaign_id: Uuid) -> Result<bool, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt(
        "SELECT 1 FROM withdrawal_requests WHERE campaign_id = $1 AND quick = FALSE \
         AND status IN ('WAITING_PROOF', 'APPROVED') LIMIT 1",
        &[&campaign_id],
    ).await?;

    Ok(row.is_some())
}

pub async fn transition_withdrawal(
    pool: &Pool,
    id: Uuid,
    from: WithdrawalStatus,
    to: WithdrawalStatus,
    note: Option<&str>,
) -> Result<bool, DatabaseError> {
    let client = get_client(pool).await?;
    let result = client.execute(
        "UPDATE withdrawal_requests SET status = $3, \
         verification_result = COALESCE($4, verification_result), updated_at = NOW() \
         WHERE id = $1 AND status = $2",
        &[&id, &from.as_str(), &to.as_str(), &note],
    ).await;

    match result {
        Ok(updated) => Ok(updated == 1),
        Err(e) if is_unique_violation(&e) => Err(DatabaseError::Conflict(format!(
            "withdrawal {} cannot enter {} while another request is in flight",
            id, to
        ))),
        Err(e) => Err(e.into()),
    }
}

pub async fn list_withdrawals(
    pool: &Pool,
    status: Option<WithdrawalStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<WithdrawalRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let status = status.map(|s| s.as_str());
    let rows = client.query(
        concat!("SELECT ", withdrawal_columns!(), " FROM withdrawal_requests \
                 WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at DESC LIMIT $2 OFFSET $3"),
        &[&status, &limit, &offset],
    ).await?;

    collect(&rows, row_to_withdrawal)
}

pub async fn list_withdrawals_by_campaign(pool: &Pool, campaign_id: Uuid) -> Result<Vec<WithdrawalRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let rows = client.query(
        concat!("SELECT ", withdrawal_columns!(), " FROM withdrawal_requests \
                 WHERE campaign_id = $1 ORDER BY created_at DESC"),
        &[&campaign_id],
    ).await?;

    collect(&rows, row_to_withdrawal)
}

// ============================================
// PROOF QUERIES
// ============================================

pub async fn insert_proof(pool: &Pool, proof: &ProofRecord) -> Result<(), DatabaseError> {
    let client = get_client(pool).await?;
    client.execute(
        concat!("INSERT INTO proofs (", proof_columns!(), ") \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"),
        &[
            &proof.id,
            &proof.withdrawal_id,
            &proof.evidence_url,
            &proof.supporting_urls,
            &proof.description,
            &proof.proof_type.as_str(),
            &proof.ai_status.as_str(),
            &proof.ai_score,
            &proof.ai_analysis,
            &proof.created_at,
            &proof.updated_at,
        ],
    ).await?;

    Ok(())
}

pub async fn get_proof(pool: &Pool, id: Uuid) -> Result<Option<ProofRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt(
        concat!("SELECT ", proof_columns!(), " FROM proofs WHERE id = $1"),
        &[&id],
    ).await?;

    row.as_ref().map(row_to_proof).transpose()
}

pub async fn list_proofs_by_withdrawal(pool: &Pool, withdrawal_id: Uuid) -> Result<Vec<ProofRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let rows = client.query(
        concat!("SELECT ", proof_columns!(), " FROM proofs WHERE withdrawal_id = $1 ORDER BY created_at DESC"),
        &[&withdrawal_id],
    ).await?;

    collect(&rows, row_to_proof)
}

pub async fn delete_proof(pool: &Pool, id: Uuid) -> Result<bool, DatabaseError> {
    let client = get_client(pool).await?;
    let deleted = client.execute("DELETE FROM proofs WHERE id = $1", &[&id]).await?;
    Ok(deleted == 1)
}

/// Marker insert and verdict update in one transaction.
pub async fn apply_proof_verdict(
    pool: &Pool,
    event_key: &str,
    proof_id: Uuid,
    verdict: &ProofVerdict,
) -> Result<VerdictWrite, DatabaseError> {
    let mut client = get_client(pool).await?;
    let tx = client.transaction().await?;

    let marked = tx.execute(
        "INSERT INTO processed_events (event_id, processed_at) VALUES ($1, NOW()) ON CONFLICT (event_id) DO NOTHING",
        &[&event_key],
    ).await?;
    if marked == 0 {
        return Ok(VerdictWrite::Duplicate);
    }

    let row = tx.query_opt(
        concat!("UPDATE proofs SET ai_status = $2, ai_score = $3, ai_analysis = $4, updated_at = NOW() \
                 WHERE id = $1 RETURNING ", proof_columns!()),
        &[&proof_id, &verdict.ai_status.as_str(), &verdict.ai_score, &verdict.ai_analysis],
    ).await?;

    let Some(row) = row else {
        // Marker is rolled back with the transaction.
        return Ok(VerdictWrite::ProofNotFound);
    };
    let proof = row_to_proof(&row)?;

    tx.commit().await?;
    Ok(VerdictWrite::Applied(proof))
}

// ============================================
// DEAD LETTER QUERIES
// ============================================

pub async fn insert_dead_letter(pool: &Pool, record: &DeadLetterRecord) -> Result<(), DatabaseError> {
    let client = get_client(pool).await?;
    client.execute(
        "INSERT INTO dead_letters (id, topic, partition_key, payload, error, attempts, created_at, replayed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        &[
            &record.id,
            &record.topic,
            &record.partition_key,
            &record.payload,
            &record.error,
            &record.attempts,
            &record.created_at,
            &record.replayed_at,
        ],
    ).await?;

    Ok(())
}

pub async fn get_dead_letter(pool: &Pool, id: Uuid) -> Result<Option<DeadLetterRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let row = client.query_opt("SELECT * FROM dead_letters WHERE id = $1", &[&id]).await?;
    Ok(row.as_ref().map(row_to_dead_letter))
}

pub async fn list_dead_letters(pool: &Pool, limit: i64, offset: i64) -> Result<Vec<DeadLetterRecord>, DatabaseError> {
    let client = get_client(pool).await?;
    let rows = client.query(
        "SELECT * FROM dead_letters ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        &[&limit, &offset],
    ).await?;

    Ok(rows.iter().map(row_to_dead_letter).collect())
}

pub async fn mark_dead_letter_replayed(pool: &Pool, id: Uuid) -> Result<bool, DatabaseError> {
    let client = get_client(pool).await?;
    let updated = client.execute(
        "UPDATE dead_letters SET replayed_at = NOW() WHERE id = $1 AND replayed_at IS NULL",
        &[&id],
    ).await?;

    Ok(updated == 1)
}

pub async fn unmark_dead_letter_replayed(pool: &Pool, id: Uuid) -> Result<(), DatabaseError> {
    let client = get_client(pool).await?;
    client.execute(
        "UPDATE dead_letters SET replayed_at = NULL WHERE id = $1",
        &[&id],
    ).await?;

    Ok(())
}

// ============================================
// RECONCILIATION QUERIES
// ============================================

pub async fn insert_reconciliation_log(pool: &Pool, log: &ReconciliationLog) -> Result<(), DatabaseError> {
    let client = get_client(pool).await?;
    client.execute(
        "INSERT INTO reconciliation_logs (id, entity_type, entity_id, category, amount, details, resolved, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        &[
            &log.id,
            &log.entity_type,
            &log.entity_id,
            &log.category,
            &log.amount,
            &log.details,
            &log.resolved,
            &log.created_at,
        ],
    ).await?;

    info!("Reconciliation log {} recorded for {} {}", log.category, log.entity_type, log.entity_id);
    Ok(())
}

pub async fn list_reconciliation_logs(pool: &Pool, limit: i64, offset: i64) -> Result<Vec<ReconciliationLog>, DatabaseError> {
    let client = get_client(pool).await?;
    let rows = client.query(
        "SELECT * FROM reconciliation_logs ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        &[&limit, &offset],
    ).await?;

    Ok(rows.iter().map(row_to_reconciliation).collect())
}
