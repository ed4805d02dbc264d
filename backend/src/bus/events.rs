//! Payloads carried on the bus topics and the inbound verification callback.
//!
//! Field names are part of the wire contract with the other services:
//! bus payloads are camelCase, the hybrid callback is snake_case.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `donation-events`: a donation was confirmed by the payment provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DonationEvent {
    pub donation_id: Uuid,
    pub campaign_id: Uuid,
    pub amount: i64,
    pub donor_name: String,
    pub message: Option<String>,
}

/// `contract-sign-request`: a campaign is live and needs its contract issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSignRequest {
    pub campaign_id: Uuid,
    pub campaign_name: String,
    pub target_amount: i64,
    pub currency: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub organizer_id: String,
    pub organizer_name: Option<String>,
    pub organizer_id_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationContext {
    pub campaign_context: String,
    pub withdrawal_reason: String,
}

/// `proof-verification-request`: score one piece of evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofVerificationRequest {
    pub proof_id: Uuid,
    pub image_url: String,
    #[serde(rename = "type")]
    pub proof_type: String,
    pub context: VerificationContext,
}

/// `hybrid-reasoning-request`: score bills and scene photos together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridReasoningRequest {
    pub proof_id: Uuid,
    pub campaign_id: Uuid,
    pub list_bill_image_url: Vec<String>,
    pub list_image_url: Vec<String>,
    pub withdrawal_reason: String,
    pub campaign_goal: String,
}

/// Image forensics attached to a verification result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerificationMetadata {
    pub has_exif_warning: bool,
    pub details: Option<String>,
    pub software_detected: Option<String>,
    pub is_duplicate: bool,
}

/// `proof-verification-result`: verdict from the AI service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProofVerificationResult {
    pub proof_id: Uuid,
    pub score: f64,
    pub is_valid: bool,
    #[serde(default)]
    pub analysis_details: String,
    #[serde(default)]
    pub metadata: Option<VerificationMetadata>,
    /// Set by producers that re-verify the same proof.
    #[serde(default)]
    pub event_version: Option<String>,
}

/// Body of `POST /internal/proofs/hybrid-callback`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HybridVerificationCallback {
    pub proof_id: Uuid,
    pub trust_score: f64,
    pub is_valid: bool,
    #[serde(default)]
    pub analysis_summary: String,
    pub trust_hash: Option<String>,
    pub gemini_total_amount: Option<f64>,
    pub gemini_items_count: Option<i64>,
    #[serde(default)]
    pub gemini_price_warnings: Vec<String>,
    pub clip_scene_score: Option<f64>,
    #[serde(default)]
    pub duplicate_detected: bool,
    pub timestamp: Option<String>,
}
