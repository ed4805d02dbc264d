//! # Fund Ledger Backend Service
//!
//! This is the main entry point of the service that keeps the money of
//! crowdfunding campaigns honest. It provides:
//!
//! - REST API for campaigns, donations, withdrawals and proofs
//! - WebSocket topics for live campaign totals and proof verdicts
//! - Event bus consumers that credit the ledger and apply AI verdicts
//! - Background loops for chain auditing, saga recovery and settlement sweeps
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                           │
//! │                                                                  │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  REST API   │  │  WebSocket  │  │   Background Services   │  │
//! │  │  (Actix)    │  │  Topics     │  │  • Chain Auditor        │  │
//! │  │ /campaigns  │  │  stats      │  │  • Saga Recovery        │  │
//! │  │ /donations  │  │  activity   │  │  • Bus Consumers        │  │
//! │  │ /withdrawals│  │  proof      │  │  • Settlement Sweep     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! │         │                │                     │                 │
//! │         └────────────────┴─────────────────────┘                 │
//! │                          │                                       │
//! │  ┌───────────────────────┴───────────────────────────────────┐  │
//! │  │                    SERVICE LAYER                           │  │
//! │  │  Campaign saga • Donations • Withdrawals • Proofs • Ledger │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                          │                                       │
//! │         ┌────────────────┴────────────────┐                     │
//! │         │                                 │                      │
//! │  ┌──────┴──────┐                   ┌──────┴──────┐              │
//! │  │  PostgreSQL │                   │  Identity   │              │
//! │  │  (or memory)│                   │  Service    │              │
//! │  └─────────────┘                   └─────────────┘              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! 1. Set up PostgreSQL and create the database
//! 2. Copy `.env.example` to `.env` and configure
//! 3. Start the server: `cargo run` (the schema is applied at startup)
//!
//! For a throwaway instance without PostgreSQL set `STORE_BACKEND=memory`.
//!
//! ## Environment Variables
//!
//! See `.env.example` for all required configuration.

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod api;
mod bus;
mod cache;
mod clients;
mod config;
mod db;
mod errors;
mod models;
mod services;
mod utils;
mod websocket;

#[cfg(test)]
mod test_support;

use bus::consumer::{spawn_consumer, ConsumerPolicy, MessageHandler, RetryPolicy};
use bus::{topics, EventBus, InProcessBus};
use cache::{CampaignCache, InMemoryCampaignCache};
use clients::{HttpIdentityClient, IdentityClient};
use config::{AppConfig, StoreBackend};
use db::{Database, MemoryStore, Stores};
use services::{
    CampaignService, ChainAuditor, DonationEventHandler, DonationService, Ledger, ProofResultHandler, ProofService,
    WithdrawalService,
};
use websocket::WsRegistry;

/// Application state shared across all handlers.
///
/// Every service is cheap to clone (it only holds `Arc`s), so background
/// tasks take their own copies instead of borrowing the state.
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// PostgreSQL pool, used by the health check. `None` on the memory backend.
    pub db: Option<Database>,

    /// One handle per store trait
    pub stores: Stores,

    /// In-process event bus
    pub bus: Arc<InProcessBus>,

    /// Hash-chained wallets
    pub ledger: Ledger,

    /// Campaign saga and lifecycle
    pub campaigns: CampaignService,

    /// Donation settlement
    pub donations: DonationService,

    /// Withdrawal state machine
    pub withdrawals: WithdrawalService,

    /// Proof upload and verdicts
    pub proofs: ProofService,

    /// WebSocket topic registry for real-time updates
    pub ws_registry: WsRegistry,
}

impl AppState {
    /// Wire every service over the given stores.
    pub fn build(
        config: AppConfig,
        db: Option<Database>,
        stores: Stores,
        identity: Arc<dyn IdentityClient>,
        cache: Arc<dyn CampaignCache>,
    ) -> Self {
        let bus = Arc::new(InProcessBus::new(config.bus_partitions));
        let publisher: Arc<dyn EventBus> = bus.clone();
        let ws_registry = WsRegistry::new();

        let ledger = Ledger::new(stores.ledger.clone(), config.chain_secrets.clone());
        let campaigns = CampaignService::new(
            &stores,
            ledger.clone(),
            identity,
            publisher.clone(),
            cache.clone(),
            &config,
        );
        let donations = DonationService::new(&stores, publisher.clone(), cache, ws_registry.clone(), &config);
        let withdrawals = WithdrawalService::new(&stores);
        let proofs = ProofService::new(&stores, publisher, ws_registry.clone(), &config);

        Self {
            config,
            db,
            stores,
            bus,
            ledger,
            campaigns,
            donations,
            withdrawals,
            proofs,
            ws_registry,
        }
    }

    /// Start a consumer group on `topic` with the configured retry policy.
    fn consume(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<(), bus::BusError> {
        let policy = ConsumerPolicy {
            retry: RetryPolicy::from_config(&self.config),
            dead_letters: self.stores.dead_letters.clone(),
        };
        let workers = spawn_consumer(&self.bus, topic, handler, policy)?;
        info!("📨 Consuming {} with {} workers", topic, workers.len());
        Ok(())
    }
}

/// Main entry point for the backend service.
///
/// This function:
/// 1. Initializes logging
/// 2. Loads configuration from environment
/// 3. Opens the store (PostgreSQL or memory)
/// 4. Wires the services
/// 5. Starts bus consumers and background loops
/// 6. Launches the HTTP server
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // =========================================
    // STEP 1: Initialize Logging
    // =========================================
    // RUST_LOG overrides the default level, e.g. RUST_LOG=fund_ledger_backend=debug
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("🚀 Starting Fund Ledger Backend Service");

    // =========================================
    // STEP 2: Load Configuration
    // =========================================
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("📋 Configuration loaded");
    info!("   Store backend: {:?}", config.store_backend);
    info!("   Identity service: {}", config.identity_service_url);
    info!("   Chain secret version: {}", config.chain_secrets.current_version());

    // =========================================
    // STEP 3: Initialize Storage
    // =========================================
    let (db, stores) = match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL is validated for the postgres backend");

            let db = Database::connect(url)
                .await
                .expect("Failed to connect to database");
            info!("🗄️  Database connected");

            db.run_migrations()
                .await
                .expect("Failed to run migrations");
            info!("📦 Database migrations complete");

            let stores = Stores::from_backend(Arc::new(db.clone()));
            (Some(db), stores)
        }
        StoreBackend::Memory => {
            info!("🧪 Using in-memory store, state is lost on restart");
            (None, Stores::from_backend(Arc::new(MemoryStore::new())))
        }
    };

    // =========================================
    // STEP 4: Initialize Collaborators & Services
    // =========================================
    let identity = HttpIdentityClient::new(&config.identity_service_url, config.collaborator_timeout)
        .expect("Failed to create identity client");
    let cache = Arc::new(InMemoryCampaignCache::new());

    let app_state = Arc::new(AppState::build(config.clone(), db, stores, Arc::new(identity), cache));

    info!("🔧 Services initialized");

    // =========================================
    // STEP 5: Start Bus Consumers
    // =========================================
    app_state
        .consume(
            topics::DONATION_EVENTS,
            Arc::new(DonationEventHandler::new(app_state.ledger.clone(), app_state.donations.clone())),
        )
        .expect("Failed to start donation consumer");

    app_state
        .consume(
            topics::PROOF_VERIFICATION_RESULT,
            Arc::new(ProofResultHandler::new(app_state.proofs.clone())),
        )
        .expect("Failed to start verdict consumer");

    // =========================================
    // STEP 6: Start Background Services
    // =========================================
    let auditor = ChainAuditor::new(
        app_state.ledger.clone(),
        app_state.stores.reconciliation.clone(),
        config.chain_audit_interval,
    );
    tokio::spawn(async move {
        auditor.start_audit_loop().await;
    });

    info!("🔗 Chain auditor started");

    let recovery = app_state.campaigns.clone();
    let recovery_interval = config.saga_recovery_interval;
    tokio::spawn(async move {
        recovery.start_recovery_loop(recovery_interval).await;
    });

    info!("♻️  Saga recovery started");

    let sweep = app_state.donations.clone();
    let sweep_interval = config.settlement_sweep_interval;
    tokio::spawn(async move {
        sweep.start_settlement_sweep(sweep_interval).await;
    });

    info!("🧹 Settlement sweep started");

    // =========================================
    // STEP 7: Start HTTP Server
    // =========================================
    let server_host = config.server_host.clone();
    let server_port = config.server_port;

    info!("🌐 Starting HTTP server on {}:{}", server_host, server_port);

    let bus = app_state.bus.clone();

    HttpServer::new(move || {
        App::new()
            // Attach shared application state
            .app_data(web::Data::new(app_state.clone()))

            // Browsers follow campaigns from other origins
            .wrap(Cors::permissive())

            // Add logging middleware
            .wrap(middleware::Logger::default())

            // Configure API routes
            .configure(api::configure_routes)

            // Configure WebSocket routes
            .configure(websocket::configure_routes)
    })
    .bind(format!("{}:{}", server_host, server_port))?
    .run()
    .await?;

    // Let consumers drain what is already queued
    bus.close();
    info!("👋 Fund Ledger Backend Service stopped");

    Ok(())
}
