//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::web;

use super::handlers;

/// Configure all API routes.
///
/// This function is called from main.rs to set up
/// all the endpoint routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                          GET  - Health check
/// ├── /campaigns                       POST - Create (saga), GET - List
/// │   ├── /{id}                        GET  - Campaign + wallet
/// │   ├── /{id}/close                  POST - Close campaign
/// │   └── /{id}/donations              GET  - Donations of a campaign
/// ├── /donations
/// │   ├── /init                        POST - Start a donation
/// │   └── /{id}                        GET  - Donation
/// ├── /webhook/payment                 POST - Bank transfer notification
/// ├── /withdrawals                     POST - Request, GET - List
/// │   ├── /{id}                        GET  - Withdrawal
/// │   ├── /{id}/approve                PUT  - Approve
/// │   ├── /{id}/reject                 PUT  - Reject
/// │   ├── /{id}/proofs                 POST - Upload, GET - List
/// │   └── /{id}/proofs/hybrid          POST - Upload bills + scenes
/// ├── /proofs/{id}                     GET  - Proof
/// ├── /wallets
/// │   ├── /campaign/{campaignId}       GET  - Wallet of a campaign
/// │   ├── /{id}/transactions           GET  - Ledger history
/// │   └── /{id}/verify                 GET  - Chain verification
/// └── /internal
///     ├── /donations/complete          POST - Settlement callback
///     ├── /proofs/hybrid-callback      POST - Hybrid verdict
///     ├── /campaigns/{id}/resume       POST - Re-run saga steps
///     ├── /wallets/{id}/transactions   POST - Append entry
///     ├── /dead-letters                GET  - List
///     ├── /dead-letters/{id}/replay    POST - Replay
///     └── /reconciliation-logs         GET  - List
/// ```
///
/// ## Internal Routes
///
/// `/internal` is served on the same listener as the public API and has no
/// authentication of its own. These routes move money and decide proofs,
/// so the deployment must keep them off the public edge: the gateway only
/// forwards the public prefixes, and `/internal/*` is reachable from the
/// service network only (payment service, AI service, operators).
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check endpoint
        .route("/health", web::get().to(handlers::health_check))

        // Campaign endpoints
        .service(
            web::scope("/campaigns")
                .route("", web::post().to(handlers::create_campaign))
                .route("", web::get().to(handlers::list_campaigns))
                .route("/{id}", web::get().to(handlers::get_campaign))
                .route("/{id}/close", web::post().to(handlers::close_campaign))
                .route("/{id}/donations", web::get().to(handlers::list_donations)),
        )

        // Donation endpoints
        .service(
            web::scope("/donations")
                .route("/init", web::post().to(handlers::init_donation))
                .route("/{id}", web::get().to(handlers::get_donation)),
        )

        // Payment gateway webhook
        .route("/webhook/payment", web::post().to(handlers::payment_webhook))

        // Withdrawal and proof endpoints
        .service(
            web::scope("/withdrawals")
                .route("", web::post().to(handlers::create_withdrawal))
                .route("", web::get().to(handlers::list_withdrawals))
                .route("/{id}", web::get().to(handlers::get_withdrawal))
                .route("/{id}/approve", web::put().to(handlers::approve_withdrawal))
                .route("/{id}/reject", web::put().to(handlers::reject_withdrawal))
                .route("/{id}/proofs", web::post().to(handlers::upload_proof))
                .route("/{id}/proofs", web::get().to(handlers::list_proofs))
                .route("/{id}/proofs/hybrid", web::post().to(handlers::upload_hybrid_proof)),
        )
        .route("/proofs/{id}", web::get().to(handlers::get_proof))

        // Ledger reads
        .service(
            web::scope("/wallets")
                .route("/campaign/{campaign_id}", web::get().to(handlers::get_wallet_by_campaign))
                .route("/{id}/transactions", web::get().to(handlers::get_transactions))
                .route("/{id}/verify", web::get().to(handlers::verify_chain)),
        )

        // Service-to-service endpoints (internal network only, see above)
        .service(
            web::scope("/internal")
                .route("/donations/complete", web::post().to(handlers::complete_donation))
                .route("/proofs/hybrid-callback", web::post().to(handlers::hybrid_callback))
                .route("/campaigns/{id}/resume", web::post().to(handlers::resume_campaign))
                .route("/wallets/{id}/transactions", web::post().to(handlers::append_transaction))
                .route("/dead-letters", web::get().to(handlers::list_dead_letters))
                .route("/dead-letters/{id}/replay", web::post().to(handlers::replay_dead_letter))
                .route("/reconciliation-logs", web::get().to(handlers::list_reconciliation_logs)),
        );
}
