//! # API Models
//!
//! This module defines the request and response structures for the REST API.
//! These are separate from the store records in `db::models` so amounts can
//! be formatted and enums rendered as the upper-case codes clients expect.
//!
//! ## Organization
//!
//! - `requests.rs` - Incoming request bodies
//! - `responses.rs` - Outgoing response bodies
//!
//! ## Serialization
//!
//! All models use Serde for JSON serialization/deserialization.
//! Field names are converted to camelCase for JavaScript clients.

pub mod requests;
pub mod responses;

pub use requests::*;
pub use responses::*;

