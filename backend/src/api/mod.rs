//! # REST API Module
//!
//! This module defines all HTTP endpoints of the fund ledger.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/campaigns` | Create campaign (saga) |
//! | GET | `/campaigns/{id}` | Campaign with wallet |
//! | POST | `/donations/init` | Start donation, get payment QR |
//! | POST | `/webhook/payment` | Bank transfer notification |
//! | POST | `/withdrawals` | Request a withdrawal |
//! | PUT | `/withdrawals/{id}/approve` | Approve, wait for proof |
//! | POST | `/withdrawals/{id}/proofs` | Upload evidence |
//! | GET | `/wallets/{id}/verify` | Verify the hash chain |
//! | GET | `/health` | Health check |
//!
//! See [`routes::configure_routes`] for the full tree, including the
//! `/internal` endpoints called by the other services. Those carry no
//! authentication and must only be reachable from the service network.
//!
//! ## Request/Response Format
//!
//! All requests and responses use JSON:
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "ERROR_CODE",
//!         "message": "Human readable message"
//!     }
//! }
//! ```

pub mod routes;
pub mod handlers;

pub use routes::configure_routes;
