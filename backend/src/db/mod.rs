//! # Database Module
//!
//! This module handles all persistence for the fund ledger backend.
//! We use PostgreSQL for storing:
//!
//! - Campaign read-models
//! - Wallets and their hash-chained ledger entries
//! - Donations, withdrawal requests and proofs
//! - Idempotency markers, dead letters and reconciliation logs
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      DATABASE LAYER                              │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │      Store traits (store.rs) used by the services         │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │                 │                               │                │
//! │                 ▼                               ▼                │
//! │  ┌──────────────────────────┐     ┌──────────────────────────┐  │
//! │  │ Database (postgres.rs)   │     │ MemoryStore (memory.rs)  │  │
//! │  │  queries.rs + deadpool   │     │  in-process, tests/dev   │  │
//! │  └──────────────────────────┘     └──────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod memory;
pub mod models;
pub mod postgres;
pub mod queries;
pub mod store;

use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::{NoTls, Config as TokioConfig};
use thiserror::Error;
use tracing::{error, info, warn};

/// Schema applied at startup. Every statement is idempotent.
const INITIAL_SCHEMA: &str = include_str!("../../migrations/001_initial_schema.sql");

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to connect to the database
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryError(#[from] tokio_postgres::Error),

    /// Migration failed
    #[error("Migration failed: {0}")]
    MigrationError(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A uniqueness rule rejected the write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored value could not be decoded
    #[error("Corrupt row: {0}")]
    DecodeError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Database connection wrapper.
///
/// This struct wraps the connection pool. It implements every store
/// trait in [`store`] (see `postgres.rs`).
///
/// ## Usage
///
/// ```rust,ignore
/// let db = Database::connect("postgres://...").await?;
/// let wallet = queries::get_wallet_by_campaign(db.pool(), campaign_id).await?;
/// ```
#[derive(Clone)]
pub struct Database {
    /// The connection pool
    pool: Pool,
}

impl Database {
    /// Connect to the PostgreSQL database.
    ///
    /// Creates a connection pool with a maximum of 10 connections and
    /// verifies connectivity with a trivial query.
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        info!("Connecting to database...");

        // Parse the connection string using tokio_postgres::Config
        let tokio_config = database_url.parse::<TokioConfig>()
            .map_err(|e| DatabaseError::ConfigError(format!("Invalid database URL: {}", e)))?;

        // Convert to deadpool config
        let mut config = Config::new();

        if let Some(dbname) = tokio_config.get_dbname() {
            config.dbname = Some(dbname.to_string());
        }
        if let Some(user) = tokio_config.get_user() {
            config.user = Some(user.to_string());
        }
        if let Some(password) = tokio_config.get_password() {
            config.password = Some(String::from_utf8_lossy(password).to_string());
        }
        if let Some(tokio_postgres::config::Host::Tcp(host)) = tokio_config.get_hosts().first() {
            config.host = Some(host.clone());
        }
        if let Some(port) = tokio_config.get_ports().first() {
            config.port = Some(*port);
        }

        config.pool = Some(deadpool_postgres::PoolConfig {
            max_size: 10,
            ..Default::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        // Test connection
        let client = pool.get().await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        client.query("SELECT 1", &[]).await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    ///
    /// The schema is compiled into the binary and executed as one batch.
    /// Statements use `IF NOT EXISTS`, so running it against an already
    /// migrated database is harmless.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        info!("Running database migrations...");

        let client = self.pool.get().await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        info!("Executing migration SQL ({} bytes)...", INITIAL_SCHEMA.len());

        match client.batch_execute(INITIAL_SCHEMA).await {
            Ok(_) => {
                info!("Migrations completed successfully");
                Ok(())
            }
            Err(e) => {
                let error_code = e.code().map(|c| c.code().to_string());
                let error_detail = e.as_db_error()
                    .and_then(|db_err| db_err.detail())
                    .unwrap_or("No detail available")
                    .to_string();

                // 42P07 = duplicate_table, 42710 = duplicate_object
                let is_duplicate_error = matches!(error_code.as_deref(), Some("42P07") | Some("42710"));

                if is_duplicate_error {
                    warn!(
                        "Some database objects already exist (error code: {:?}). This is OK if migrations were run before.",
                        error_code
                    );
                    Ok(())
                } else {
                    error!("Migration execution error: {} (code: {:?}, detail: {})", e, error_code, error_detail);
                    Err(DatabaseError::MigrationError(format!(
                        "{} (code: {:?}, detail: {})",
                        e, error_code, error_detail
                    )))
                }
            }
        }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Whether a connection can currently be checked out.
    pub async fn is_healthy(&self) -> bool {
        self.pool.get().await.is_ok()
    }
}

// Re-export commonly used items
pub use memory::MemoryStore;
pub use models::*;
pub use store::*;

use std::sync::Arc;

/// One handle per store trait, as handed to the services.
///
/// Both backends implement every trait, so production wiring points all
/// fields at the same object; tests swap single fields for failing stubs.
#[derive(Clone)]
pub struct Stores {
    pub campaigns: Arc<dyn CampaignStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub donations: Arc<dyn DonationStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub withdrawals: Arc<dyn WithdrawalStore>,
    pub proofs: Arc<dyn ProofStore>,
    pub dead_letters: Arc<dyn DeadLetterStore>,
    pub reconciliation: Arc<dyn ReconciliationStore>,
}

impl Stores {
    /// Point every store at one backend.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: CampaignStore
            + LedgerStore
            + DonationStore
            + IdempotencyStore
            + WithdrawalStore
            + ProofStore
            + DeadLetterStore
            + ReconciliationStore
            + 'static,
    {
        Self {
            campaigns: backend.clone(),
            ledger: backend.clone(),
            donations: backend.clone(),
            idempotency: backend.clone(),
            withdrawals: backend.clone(),
            proofs: backend.clone(),
            dead_letters: backend.clone(),
            reconciliation: backend,
        }
    }
}
