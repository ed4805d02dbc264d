//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Extracts request data
//! 2. Calls the appropriate service
//! 3. Returns a formatted response
//!
//! Validation lives in the services so the bus consumers and the HTTP
//! surface reject the same inputs.
//!
//! ## Error Handling
//!
//! All errors are caught and returned as JSON, with the HTTP status
//! chosen by [`AppError`]:
//!
//! ```json
//! {
//!     "success": false,
//!     "error": {
//!         "code": "WITHDRAWAL_BLOCKED_WAITING_PROOF",
//!         "message": "Campaign ... already has a withdrawal waiting for proof"
//!     }
//! }
//! ```

use std::sync::Arc;

use actix_web::{web, HttpResponse, ResponseError};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bus::consumer;
use crate::bus::events::HybridVerificationCallback;
use crate::config::StoreBackend;
use crate::errors::AppError;
use crate::models::{
    ApiResponse, AppendTransactionRequest, CampaignDetailResponse, CampaignResponse, CreateCampaignRequest,
    CreateWithdrawalRequest, DeadLetterResponse, DonationCompleteRequest, DonationInitResponse, DonationResponse,
    HealthResponse, InitDonationRequest, PageQuery, PaymentWebhookRequest, ProofResponse, RejectWithdrawalRequest,
    SettlementResponse, TransactionListResponse, TransactionResponse, UploadHybridProofRequest, UploadProofRequest,
    VerdictResponse, WalletResponse, WithdrawalQuery, WithdrawalResponse,
};
use crate::services::ledger::AppendRequest;
use crate::AppState;

/// Log a failed request and render the error envelope.
///
/// Rejections (4xx) are expected traffic and logged at `warn`.
fn failure(action: &str, e: AppError) -> HttpResponse {
    if e.is_rejection() {
        warn!("{} rejected: {} ({})", action, e, e.code());
    } else {
        error!("{} failed: {} ({})", action, e, e.code());
    }
    e.error_response()
}

// ============================================
// HEALTH
// ============================================

/// Health check endpoint.
///
/// ## Endpoint
///
/// `GET /health`
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "status": "healthy",
///         "storeBackend": "postgres",
///         "database": true,
///         "version": "0.1.0",
///         "timestamp": "2025-12-08T12:00:00Z"
///     }
/// }
/// ```
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let db_healthy = match &state.db {
        Some(db) => db.is_healthy().await,
        None => true,
    };

    let response = HealthResponse {
        status: if db_healthy { "healthy" } else { "unhealthy" }.to_string(),
        store_backend: match state.config.store_backend {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        }
        .to_string(),
        database: db_healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    let status_code = if db_healthy {
        actix_web::http::StatusCode::OK
    } else {
        actix_web::http::StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

// ============================================
// CAMPAIGNS
// ============================================

/// Create a campaign.
///
/// Runs the creation saga: owner eligibility, campaign row, wallet,
/// activation, contract-sign request. A failure after the campaign row
/// was written is compensated before the error is returned.
///
/// ## Endpoint
///
/// `POST /campaigns`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/campaigns \
///   -H "Content-Type: application/json" \
///   -d '{
///     "ownerId": "user-42",
///     "title": "Flood relief",
///     "description": "Rebuild homes in Quang Binh",
///     "targetAmount": 50000000,
///     "startDate": "2025-01-01",
///     "endDate": "2025-03-01"
///   }'
/// ```
pub async fn create_campaign(
    state: web::Data<Arc<AppState>>,
    body: web::Json<CreateCampaignRequest>,
) -> HttpResponse {
    info!("Create campaign request from {}: {}", body.owner_id, body.title);

    match state.campaigns.create_campaign(body.into_inner()).await {
        Ok(campaign) => {
            info!("✅ Campaign {} is {}", campaign.id, campaign.status);
            HttpResponse::Created().json(ApiResponse::success(CampaignResponse::from(campaign)))
        }
        Err(e) => failure("Create campaign", e),
    }
}

/// `GET /campaigns?limit=20&offset=0`
pub async fn list_campaigns(state: web::Data<Arc<AppState>>, query: web::Query<PageQuery>) -> HttpResponse {
    let (limit, offset) = query.clamped();

    match state.campaigns.list_campaigns(limit, offset).await {
        Ok(campaigns) => {
            let data: Vec<CampaignResponse> = campaigns.into_iter().map(Into::into).collect();
            HttpResponse::Ok().json(ApiResponse::success(data))
        }
        Err(e) => failure("List campaigns", e),
    }
}

/// Campaign with its wallet.
///
/// ## Endpoint
///
/// `GET /campaigns/{id}`
///
/// `currentAmount` comes from the amount cache when it holds a value,
/// otherwise from the read-model (which then fills the cache).
pub async fn get_campaign(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state.campaigns.get_campaign(path.into_inner()).await {
        Ok(details) => HttpResponse::Ok().json(ApiResponse::success(CampaignDetailResponse::from(details))),
        Err(e) => failure("Get campaign", e),
    }
}

/// `POST /campaigns/{id}/close`
pub async fn close_campaign(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    let campaign_id = path.into_inner();
    info!("Close campaign request: {}", campaign_id);

    match state.campaigns.close_campaign(campaign_id).await {
        Ok(campaign) => HttpResponse::Ok().json(ApiResponse::success(CampaignResponse::from(campaign))),
        Err(e) => failure("Close campaign", e),
    }
}

/// Re-run the remaining saga steps for a PENDING campaign.
///
/// `POST /internal/campaigns/{id}/resume`
pub async fn resume_campaign(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    let campaign_id = path.into_inner();
    info!("Resume campaign request: {}", campaign_id);

    match state.campaigns.resume_campaign(campaign_id).await {
        Ok(campaign) => HttpResponse::Ok().json(ApiResponse::success(CampaignResponse::from(campaign))),
        Err(e) => failure("Resume campaign", e),
    }
}

// ============================================
// DONATIONS
// ============================================

/// Start a donation.
///
/// Returns the payment code the donor must put in the transfer
/// description, and a VietQR image that pre-fills it.
///
/// ## Endpoint
///
/// `POST /donations/init`
///
/// ## Request Body
///
/// ```json
/// {
///     "campaignId": "550e8400-e29b-41d4-a716-446655440000",
///     "amount": 200000,
///     "donorName": "Lan",
///     "message": "Stay strong"
/// }
/// ```
pub async fn init_donation(
    state: web::Data<Arc<AppState>>,
    body: web::Json<InitDonationRequest>,
) -> HttpResponse {
    info!("Init donation request: {} for campaign {}", body.amount, body.campaign_id);

    match state.donations.initialize_donation(body.into_inner()).await {
        Ok(init) => HttpResponse::Created().json(ApiResponse::success(DonationInitResponse::from(init))),
        Err(e) => failure("Init donation", e),
    }
}

/// `GET /donations/{id}`
pub async fn get_donation(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state.donations.get_donation(path.into_inner()).await {
        Ok(donation) => HttpResponse::Ok().json(ApiResponse::success(DonationResponse::from(donation))),
        Err(e) => failure("Get donation", e),
    }
}

/// `GET /campaigns/{id}/donations?limit=20&offset=0`
pub async fn list_donations(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    query: web::Query<PageQuery>,
) -> HttpResponse {
    let (limit, offset) = query.clamped();

    match state.donations.list_donations(path.into_inner(), limit, offset).await {
        Ok(donations) => {
            let data: Vec<DonationResponse> = donations.into_iter().map(Into::into).collect();
            HttpResponse::Ok().json(ApiResponse::success(data))
        }
        Err(e) => failure("List donations", e),
    }
}

/// Bank transfer notification from the payment gateway.
///
/// ## Endpoint
///
/// `POST /webhook/payment`
///
/// ## Request Body
///
/// ```json
/// {
///     "content": "TS1718000000000AB12CD34EF Flood relief",
///     "transferAmount": 200000,
///     "gateway": "MBBank",
///     "referenceCode": "FT24123456789"
/// }
/// ```
///
/// A notification for an already completed donation is acknowledged
/// with `ALREADY_COMPLETED` so the gateway stops retrying.
pub async fn payment_webhook(
    state: web::Data<Arc<AppState>>,
    body: web::Json<PaymentWebhookRequest>,
) -> HttpResponse {
    info!(
        "💸 Payment webhook: {} via {}",
        body.transfer_amount,
        body.gateway.as_deref().unwrap_or("unknown gateway")
    );

    match state.donations.settle_by_webhook(body.into_inner()).await {
        Ok(outcome) => HttpResponse::Ok().json(ApiResponse::success(SettlementResponse::from(outcome))),
        Err(e) => failure("Payment webhook", e),
    }
}

/// Settlement confirmation from the ledger side.
///
/// `POST /internal/donations/complete`
pub async fn complete_donation(
    state: web::Data<Arc<AppState>>,
    body: web::Json<DonationCompleteRequest>,
) -> HttpResponse {
    let donation_id = body.donation_id;
    info!("Donation completion callback: {}", donation_id);

    match state.donations.settle_by_external_callback(body.into_inner()).await {
        Ok(outcome) => {
            HttpResponse::Ok().json(ApiResponse::success(SettlementResponse::from_settlement(donation_id, outcome)))
        }
        Err(e) => failure("Donation completion", e),
    }
}

// ============================================
// WITHDRAWALS
// ============================================

/// Request a withdrawal.
///
/// ## Endpoint
///
/// `POST /withdrawals`
///
/// ## Request Body
///
/// ```json
/// {
///     "campaignId": "550e8400-e29b-41d4-a716-446655440000",
///     "amount": 5000000,
///     "reason": "Buy rice and water",
///     "type": "STANDARD",
///     "quick": false
/// }
/// ```
///
/// Quick withdrawals (`"quick": true` or `"type": "QUICK"`) are allowed
/// once per campaign and skip manual approval.
pub async fn create_withdrawal(
    state: web::Data<Arc<AppState>>,
    body: web::Json<CreateWithdrawalRequest>,
) -> HttpResponse {
    info!(
        "Withdrawal request: {} for campaign {} ({}{})",
        body.amount,
        body.campaign_id,
        body.withdrawal_type,
        if body.quick { ", quick" } else { "" }
    );

    match state.withdrawals.create(body.into_inner()).await {
        Ok(withdrawal) => HttpResponse::Created().json(ApiResponse::success(WithdrawalResponse::from(withdrawal))),
        Err(e) => failure("Create withdrawal", e),
    }
}

/// `GET /withdrawals?status=PENDING&limit=20&offset=0`
pub async fn list_withdrawals(
    state: web::Data<Arc<AppState>>,
    query: web::Query<WithdrawalQuery>,
) -> HttpResponse {
    let query = query.into_inner();
    let (limit, offset) = PageQuery {
        limit: query.limit,
        offset: query.offset,
    }
    .clamped();

    match state.withdrawals.list(query.status, limit, offset).await {
        Ok(withdrawals) => {
            let data: Vec<WithdrawalResponse> = withdrawals.into_iter().map(Into::into).collect();
            HttpResponse::Ok().json(ApiResponse::success(data))
        }
        Err(e) => failure("List withdrawals", e),
    }
}

/// `GET /withdrawals/{id}`
pub async fn get_withdrawal(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state.withdrawals.get(path.into_inner()).await {
        Ok(withdrawal) => HttpResponse::Ok().json(ApiResponse::success(WithdrawalResponse::from(withdrawal))),
        Err(e) => failure("Get withdrawal", e),
    }
}

/// Approve a pending withdrawal. It then waits for proof.
///
/// `PUT /withdrawals/{id}/approve`
pub async fn approve_withdrawal(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    let withdrawal_id = path.into_inner();
    info!("Approve withdrawal request: {}", withdrawal_id);

    match state.withdrawals.approve(withdrawal_id).await {
        Ok(withdrawal) => HttpResponse::Ok().json(ApiResponse::success(WithdrawalResponse::from(withdrawal))),
        Err(e) => failure("Approve withdrawal", e),
    }
}

/// `PUT /withdrawals/{id}/reject`
pub async fn reject_withdrawal(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<RejectWithdrawalRequest>,
) -> HttpResponse {
    let withdrawal_id = path.into_inner();
    info!("Reject withdrawal request: {}", withdrawal_id);

    match state.withdrawals.reject(withdrawal_id, &body.reason).await {
        Ok(withdrawal) => HttpResponse::Ok().json(ApiResponse::success(WithdrawalResponse::from(withdrawal))),
        Err(e) => failure("Reject withdrawal", e),
    }
}

// ============================================
// PROOFS
// ============================================

/// Upload evidence for an approved withdrawal.
///
/// ## Endpoint
///
/// `POST /withdrawals/{id}/proofs`
///
/// ## Request Body
///
/// ```json
/// {
///     "evidenceUrl": "https://cdn.example.org/bills/123.jpg",
///     "description": "Rice invoice"
/// }
/// ```
///
/// The proof is returned in `PROCESSING`; the verdict is pushed on
/// `/ws/withdrawals/{id}/proof` once the AI service answers.
pub async fn upload_proof(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<UploadProofRequest>,
) -> HttpResponse {
    let withdrawal_id = path.into_inner();
    info!("Proof upload for withdrawal {}", withdrawal_id);

    match state.proofs.upload_proof(withdrawal_id, body.into_inner()).await {
        Ok(proof) => HttpResponse::Created().json(ApiResponse::success(ProofResponse::from(proof))),
        Err(e) => failure("Upload proof", e),
    }
}

/// `POST /withdrawals/{id}/proofs/hybrid`
pub async fn upload_hybrid_proof(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<UploadHybridProofRequest>,
) -> HttpResponse {
    let withdrawal_id = path.into_inner();
    info!(
        "Hybrid proof upload for withdrawal {} ({} bills, {} scenes)",
        withdrawal_id,
        body.bill_image_urls.len(),
        body.scene_image_urls.len()
    );

    match state.proofs.upload_hybrid_proof(withdrawal_id, body.into_inner()).await {
        Ok(proof) => HttpResponse::Created().json(ApiResponse::success(ProofResponse::from(proof))),
        Err(e) => failure("Upload hybrid proof", e),
    }
}

/// `GET /withdrawals/{id}/proofs`
pub async fn list_proofs(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state.proofs.list_proofs(path.into_inner()).await {
        Ok(proofs) => {
            let data: Vec<ProofResponse> = proofs.into_iter().map(Into::into).collect();
            HttpResponse::Ok().json(ApiResponse::success(data))
        }
        Err(e) => failure("List proofs", e),
    }
}

/// `GET /proofs/{id}`
pub async fn get_proof(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state.proofs.get_proof(path.into_inner()).await {
        Ok(proof) => HttpResponse::Ok().json(ApiResponse::success(ProofResponse::from(proof))),
        Err(e) => failure("Get proof", e),
    }
}

/// Verdict of the hybrid (Gemini + CLIP + hash) verification.
///
/// `POST /internal/proofs/hybrid-callback`
pub async fn hybrid_callback(
    state: web::Data<Arc<AppState>>,
    body: web::Json<HybridVerificationCallback>,
) -> HttpResponse {
    let proof_id = body.proof_id;
    info!("Hybrid verdict for proof {}: {} (valid: {})", proof_id, body.trust_score, body.is_valid);

    match state.proofs.apply_hybrid_callback(&body).await {
        Ok(outcome) => HttpResponse::Ok().json(ApiResponse::success(VerdictResponse::new(proof_id, outcome))),
        Err(e) => failure("Hybrid callback", e),
    }
}

// ============================================
// LEDGER
// ============================================

/// `GET /wallets/campaign/{campaignId}`
pub async fn get_wallet_by_campaign(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    match state.ledger.get_wallet_by_campaign(path.into_inner()).await {
        Ok(wallet) => HttpResponse::Ok().json(ApiResponse::success(WalletResponse::from(wallet))),
        Err(e) => failure("Get wallet", e),
    }
}

/// Ledger history of a wallet, newest first.
///
/// ## Endpoint
///
/// `GET /wallets/{id}/transactions?limit=20&offset=0`
pub async fn get_transactions(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    query: web::Query<PageQuery>,
) -> HttpResponse {
    let wallet_id = path.into_inner();
    let (limit, offset) = query.clamped();

    match state.ledger.history(wallet_id, limit, offset).await {
        Ok(entries) => HttpResponse::Ok().json(ApiResponse::success(TransactionListResponse {
            wallet_id,
            transactions: entries.into_iter().map(TransactionResponse::from).collect(),
            offset,
            limit,
        })),
        Err(e) => failure("Get transactions", e),
    }
}

/// Recompute a wallet's chain and compare it with the stored hashes.
///
/// ## Endpoint
///
/// `GET /wallets/{id}/verify`
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "walletId": "…",
///         "isValid": false,
///         "integrity": "TAMPERED",
///         "totalEntries": 12,
///         "invalidEntries": [
///             { "sequence": 7, "expectedHash": "…", "actualHash": "…", "reason": "hash mismatch" }
///         ],
///         "cachedBalance": 900000,
///         "calculatedBalance": 900000,
///         "balanceMatch": true
///     }
/// }
/// ```
pub async fn verify_chain(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    let wallet_id = path.into_inner();

    match state.ledger.verify_chain(wallet_id).await {
        Ok(audit) => {
            if !audit.is_valid {
                warn!("🚨 Chain of wallet {} failed verification: {:?}", wallet_id, audit.integrity);
            }
            HttpResponse::Ok().json(ApiResponse::success(audit))
        }
        Err(e) => failure("Verify chain", e),
    }
}

/// Append a disbursement or adjustment to a wallet.
///
/// `POST /internal/wallets/{id}/transactions`
pub async fn append_transaction(
    state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<AppendTransactionRequest>,
) -> HttpResponse {
    let wallet_id = path.into_inner();
    let body = body.into_inner();
    info!("Append {} of {} to wallet {}", body.transaction_type, body.amount, wallet_id);

    let request = AppendRequest {
        wallet_id,
        amount: body.amount,
        tx_type: body.transaction_type,
        description: body.description,
        reference: body.reference,
    };

    match state.ledger.append_transaction(request).await {
        Ok(entry) => HttpResponse::Created().json(ApiResponse::success(TransactionResponse::from(entry))),
        Err(e) => failure("Append transaction", e),
    }
}

// ============================================
// OPERATIONS
// ============================================

/// `GET /internal/dead-letters?limit=20&offset=0`
pub async fn list_dead_letters(state: web::Data<Arc<AppState>>, query: web::Query<PageQuery>) -> HttpResponse {
    let (limit, offset) = query.clamped();

    match state.stores.dead_letters.list_dead_letters(limit, offset).await {
        Ok(records) => {
            let data: Vec<DeadLetterResponse> = records.into_iter().map(Into::into).collect();
            HttpResponse::Ok().json(ApiResponse::success(data))
        }
        Err(e) => failure("List dead letters", e.into()),
    }
}

/// Re-publish a dead-lettered message to its original topic.
///
/// `POST /internal/dead-letters/{id}/replay`
pub async fn replay_dead_letter(state: web::Data<Arc<AppState>>, path: web::Path<Uuid>) -> HttpResponse {
    let id = path.into_inner();
    info!("Replay dead letter request: {}", id);

    match consumer::replay_dead_letter(state.stores.dead_letters.as_ref(), state.bus.as_ref(), id).await {
        Ok(record) => HttpResponse::Ok().json(ApiResponse::success(DeadLetterResponse::from(record))),
        Err(e) => failure("Replay dead letter", e.into()),
    }
}

/// `GET /internal/reconciliation-logs?limit=20&offset=0`
pub async fn list_reconciliation_logs(
    state: web::Data<Arc<AppState>>,
    query: web::Query<PageQuery>,
) -> HttpResponse {
    let (limit, offset) = query.clamped();

    match state.stores.reconciliation.list_reconciliation_logs(limit, offset).await {
        Ok(logs) => HttpResponse::Ok().json(ApiResponse::success(logs)),
        Err(e) => failure("List reconciliation logs", e.into()),
    }
}
