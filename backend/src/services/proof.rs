//! # Proof Verification
//!
//! Evidence uploaded for an approved withdrawal goes to the AI
//! verification service over the bus; the verdict comes back either on
//! `proof-verification-result` or on the internal hybrid callback.
//!
//! ## Verdict Handling
//!
//! ```text
//! verdict(proofId, score, isValid, analysis, metadata)
//!        │
//!        ▼  event key = proof:{proofId}:{eventVersion | sha256(payload)}
//! apply_verdict (marker + proof update, one transaction)
//!        │
//!        ├─ duplicate ──► no-op
//!        ▼
//! push proof_update on withdrawal:{id}:proof
//!        │
//!        └─ isValid && score >= threshold ──► proof_review_candidate
//! ```
//!
//! A verdict never changes the withdrawal itself. High-confidence proofs
//! are only surfaced for a reviewer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::consumer::{HandlerError, MessageHandler};
use crate::bus::events::{
    HybridReasoningRequest, HybridVerificationCallback, ProofVerificationRequest, ProofVerificationResult,
    VerificationContext, VerificationMetadata,
};
use crate::bus::{publish_event, topics, BusMessage, EventBus};
use crate::config::AppConfig;
use crate::db::{
    AiStatus, CampaignRecord, CampaignStore, ProofRecord, ProofStore, ProofType, ProofVerdict, Stores,
    VerdictWrite, WithdrawalRecord, WithdrawalStatus, WithdrawalStore,
};
use crate::errors::AppError;
use crate::models::{UploadHybridProofRequest, UploadProofRequest};
use crate::websocket::{proof_topic, ProofUpdateData, WsEventType, WsRegistry};

/// Result of applying one verdict.
#[derive(Debug, Clone)]
pub enum VerdictOutcome {
    Applied(ProofRecord),
    Duplicate,
}

/// Idempotency key of a verdict.
///
/// Producers that re-verify a proof send an explicit version; otherwise
/// the digest of the payload tells redeliveries apart from new verdicts.
pub fn verdict_event_key<T: Serialize>(proof_id: Uuid, event_version: Option<&str>, payload: &T) -> String {
    match event_version {
        Some(version) if !version.trim().is_empty() => format!("proof:{}:{}", proof_id, version.trim()),
        _ => {
            let bytes = serde_json::to_vec(payload).unwrap_or_default();
            format!("proof:{}:{}", proof_id, hex::encode(Sha256::digest(&bytes)))
        }
    }
}

#[derive(Clone)]
pub struct ProofService {
    campaigns: Arc<dyn CampaignStore>,
    withdrawals: Arc<dyn WithdrawalStore>,
    proofs: Arc<dyn ProofStore>,
    bus: Arc<dyn EventBus>,
    ws: WsRegistry,
    trust_score_threshold: i32,
}

impl ProofService {
    pub fn new(stores: &Stores, bus: Arc<dyn EventBus>, ws: WsRegistry, config: &AppConfig) -> Self {
        Self {
            campaigns: stores.campaigns.clone(),
            withdrawals: stores.withdrawals.clone(),
            proofs: stores.proofs.clone(),
            bus,
            ws,
            trust_score_threshold: config.trust_score_threshold,
        }
    }

    // ==========================================
    // UPLOADS
    // ==========================================

    /// Attach evidence to a withdrawal and request a single-image verification.
    ///
    /// ## Errors
    ///
    /// * `WITHDRAWAL_NOT_FOUND` - no such withdrawal
    /// * `INVALID_STATUS` - withdrawal is not APPROVED or WAITING_PROOF
    /// * `BUS_ERROR` - request could not be published; the proof is removed again
    pub async fn upload_proof(
        &self,
        withdrawal_id: Uuid,
        request: UploadProofRequest,
    ) -> Result<ProofRecord, AppError> {
        if request.evidence_url.trim().is_empty() {
            return Err(AppError::Validation("evidenceUrl is required".to_string()));
        }

        let (withdrawal, campaign) = self.accepting_proofs(withdrawal_id).await?;
        let proof_type = ProofType::for_withdrawal(withdrawal.withdrawal_type);
        let proof = self
            .new_proof(&withdrawal, request.evidence_url.trim().to_string(), Vec::new(), request.description, proof_type)
            .await?;

        let event = ProofVerificationRequest {
            proof_id: proof.id,
            image_url: proof.evidence_url.clone(),
            proof_type: proof_type.as_str().to_string(),
            context: VerificationContext {
                campaign_context: format!("{} - {}", campaign.title, campaign.description),
                withdrawal_reason: withdrawal.reason.clone(),
            },
        };
        self.publish_or_discard(&proof, topics::PROOF_VERIFICATION_REQUEST, &event).await?;

        info!("🔍 Proof {} ({}) sent for verification", proof.id, proof_type);
        Ok(proof)
    }

    /// Attach bills and scene photos and request a hybrid verification.
    ///
    /// The verdict comes back on the internal hybrid callback.
    pub async fn upload_hybrid_proof(
        &self,
        withdrawal_id: Uuid,
        request: UploadHybridProofRequest,
    ) -> Result<ProofRecord, AppError> {
        let bills: Vec<String> = clean_urls(request.bill_image_urls);
        let scenes: Vec<String> = clean_urls(request.scene_image_urls);
        let Some((primary, other_bills)) = bills.split_first() else {
            return Err(AppError::Validation("at least one bill image is required".to_string()));
        };

        let (withdrawal, campaign) = self.accepting_proofs(withdrawal_id).await?;

        let supporting: Vec<String> = other_bills.iter().chain(scenes.iter()).cloned().collect();
        let proof = self
            .new_proof(&withdrawal, primary.clone(), supporting, request.description, ProofType::Invoice)
            .await?;

        let event = HybridReasoningRequest {
            proof_id: proof.id,
            campaign_id: campaign.id,
            list_bill_image_url: bills.clone(),
            list_image_url: scenes,
            withdrawal_reason: withdrawal.reason.clone(),
            campaign_goal: if campaign.description.is_empty() {
                campaign.title.clone()
            } else {
                campaign.description.clone()
            },
        };
        self.publish_or_discard(&proof, topics::HYBRID_REASONING_REQUEST, &event).await?;

        info!("🔍 Proof {} sent for hybrid verification ({} bills)", proof.id, bills.len());
        Ok(proof)
    }

    async fn accepting_proofs(&self, withdrawal_id: Uuid) -> Result<(WithdrawalRecord, CampaignRecord), AppError> {
        let withdrawal = self
            .withdrawals
            .get_withdrawal(withdrawal_id)
            .await?
            .ok_or(AppError::WithdrawalNotFound(withdrawal_id))?;

        if !matches!(withdrawal.status, WithdrawalStatus::Approved | WithdrawalStatus::WaitingProof) {
            return Err(AppError::InvalidStatus(format!(
                "withdrawal {} is {}, proofs need APPROVED or WAITING_PROOF",
                withdrawal_id, withdrawal.status
            )));
        }

        let campaign = self
            .campaigns
            .get_campaign(withdrawal.campaign_id)
            .await?
            .ok_or(AppError::CampaignNotFound(withdrawal.campaign_id))?;

        Ok((withdrawal, campaign))
    }

    async fn new_proof(
        &self,
        withdrawal: &WithdrawalRecord,
        evidence_url: String,
        supporting_urls: Vec<String>,
        description: Option<String>,
        proof_type: ProofType,
    ) -> Result<ProofRecord, AppError> {
        let now = Utc::now();
        let proof = ProofRecord {
            id: Uuid::new_v4(),
            withdrawal_id: withdrawal.id,
            evidence_url,
            supporting_urls,
            description,
            proof_type,
            ai_status: AiStatus::Processing,
            ai_score: None,
            ai_analysis: None,
            created_at: now,
            updated_at: now,
        };
        self.proofs.insert_proof(&proof).await?;
        Ok(proof)
    }

    /// Publish the verification request, removing the proof if that fails
    /// so no proof sits in PROCESSING without a request behind it.
    async fn publish_or_discard<T: Serialize + Sync>(
        &self,
        proof: &ProofRecord,
        topic: &str,
        event: &T,
    ) -> Result<(), AppError> {
        if let Err(e) = publish_event(self.bus.as_ref(), topic, &proof.id.to_string(), event).await {
            warn!("Failed to request verification of proof {}: {}", proof.id, e);
            if let Err(delete_err) = self.proofs.delete_proof(proof.id).await {
                warn!("Failed to remove unsent proof {}: {}", proof.id, delete_err);
            }
            return Err(e.into());
        }
        Ok(())
    }

    // ==========================================
    // VERDICTS
    // ==========================================

    /// Apply a verdict from `proof-verification-result`.
    pub async fn apply_verification_result(
        &self,
        result: &ProofVerificationResult,
        event_key: &str,
    ) -> Result<VerdictOutcome, AppError> {
        let analysis = enrich_bus_analysis(&result.analysis_details, result.metadata.as_ref());
        self.apply(result.proof_id, result.score, result.is_valid, analysis, event_key).await
    }

    /// Apply a verdict from the hybrid verification callback.
    pub async fn apply_hybrid_callback(
        &self,
        callback: &HybridVerificationCallback,
    ) -> Result<VerdictOutcome, AppError> {
        let event_key = verdict_event_key(callback.proof_id, None, callback);
        let analysis = enrich_hybrid_analysis(callback);
        self.apply(callback.proof_id, callback.trust_score, callback.is_valid, analysis, &event_key).await
    }

    async fn apply(
        &self,
        proof_id: Uuid,
        score: f64,
        is_valid: bool,
        analysis: String,
        event_key: &str,
    ) -> Result<VerdictOutcome, AppError> {
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            return Err(AppError::Validation(format!("trust score {} is outside 0-100", score)));
        }

        let verdict = ProofVerdict {
            ai_status: if is_valid { AiStatus::Verified } else { AiStatus::Rejected },
            ai_score: score.round() as i32,
            ai_analysis: analysis,
        };

        let proof = match self.proofs.apply_verdict(event_key, proof_id, &verdict).await? {
            VerdictWrite::Applied(proof) => proof,
            VerdictWrite::Duplicate => {
                info!("Verdict {} already applied, ignoring", event_key);
                return Ok(VerdictOutcome::Duplicate);
            }
            VerdictWrite::ProofNotFound => return Err(AppError::ProofNotFound(proof_id)),
        };

        info!(
            "Proof {} verified: {} (score {})",
            proof.id, verdict.ai_status, verdict.ai_score
        );

        let update = ProofUpdateData {
            proof_id: proof.id,
            withdrawal_id: proof.withdrawal_id,
            ai_status: verdict.ai_status.as_str().to_string(),
            ai_score: Some(verdict.ai_score),
            ai_analysis: proof.ai_analysis.clone(),
        };
        let topic = proof_topic(proof.withdrawal_id);
        if let Err(e) = self.ws.send_to_topic(&topic, WsEventType::ProofUpdate, update.clone()).await {
            warn!("Failed to push verdict of proof {}: {}", proof.id, e);
        }

        if is_valid && verdict.ai_score >= self.trust_score_threshold {
            info!(
                "⭐ Proof {} of withdrawal {} scored {} (threshold {}), ready for review",
                proof.id, proof.withdrawal_id, verdict.ai_score, self.trust_score_threshold
            );
            if let Err(e) = self.ws.send_to_topic(&topic, WsEventType::ProofReviewCandidate, update).await {
                warn!("Failed to push review candidate {}: {}", proof.id, e);
            }
        }

        Ok(VerdictOutcome::Applied(proof))
    }

    // ==========================================
    // READS
    // ==========================================

    pub async fn get_proof(&self, proof_id: Uuid) -> Result<ProofRecord, AppError> {
        self.proofs
            .get_proof(proof_id)
            .await?
            .ok_or(AppError::ProofNotFound(proof_id))
    }

    pub async fn list_proofs(&self, withdrawal_id: Uuid) -> Result<Vec<ProofRecord>, AppError> {
        if self.withdrawals.get_withdrawal(withdrawal_id).await?.is_none() {
            return Err(AppError::WithdrawalNotFound(withdrawal_id));
        }
        Ok(self.proofs.list_proofs_by_withdrawal(withdrawal_id).await?)
    }
}

fn clean_urls(urls: Vec<String>) -> Vec<String> {
    urls.into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect()
}

/// Fold image forensics into the stored analysis text.
fn enrich_bus_analysis(details: &str, metadata: Option<&VerificationMetadata>) -> String {
    let mut lines = vec![details.trim().to_string()];

    if let Some(metadata) = metadata {
        if metadata.has_exif_warning {
            lines.push(format!(
                "[EXIF] {}",
                metadata.details.as_deref().unwrap_or("metadata looks inconsistent")
            ));
        }
        if let Some(software) = metadata.software_detected.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("[Software] edited with {}", software));
        }
        if metadata.is_duplicate {
            lines.push("[Duplicate] image was submitted before".to_string());
        }
    }

    lines.retain(|l| !l.is_empty());
    lines.join("\n")
}

/// Fold the hybrid model outputs into the stored analysis text.
fn enrich_hybrid_analysis(callback: &HybridVerificationCallback) -> String {
    let mut lines = vec![callback.analysis_summary.trim().to_string()];

    match (callback.gemini_total_amount, callback.gemini_items_count) {
        (Some(total), Some(items)) => lines.push(format!("[Gemini] total {:.0}, {} items", total, items)),
        (Some(total), None) => lines.push(format!("[Gemini] total {:.0}", total)),
        (None, Some(items)) => lines.push(format!("[Gemini] {} items", items)),
        (None, None) => {}
    }
    for warning in &callback.gemini_price_warnings {
        lines.push(format!("[Gemini] price warning: {}", warning));
    }
    if let Some(score) = callback.clip_scene_score {
        lines.push(format!("[CLIP] scene match {:.2}", score));
    }
    if callback.duplicate_detected {
        lines.push("[Hash] duplicate image detected".to_string());
    } else if let Some(hash) = callback.trust_hash.as_deref() {
        lines.push(format!("[Hash] {}", hash));
    }

    lines.retain(|l| !l.is_empty());
    lines.join("\n")
}

/// Consumer of `proof-verification-result`.
pub struct ProofResultHandler {
    proofs: ProofService,
}

impl ProofResultHandler {
    pub fn new(proofs: ProofService) -> Self {
        Self { proofs }
    }
}

#[async_trait]
impl MessageHandler for ProofResultHandler {
    fn name(&self) -> &'static str {
        "proof-verdict"
    }

    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        let result: ProofVerificationResult = serde_json::from_value(message.payload.clone())
            .map_err(|e| HandlerError::Permanent(format!("malformed verification result: {}", e)))?;

        let event_key = verdict_event_key(result.proof_id, result.event_version.as_deref(), &message.payload);
        self.proofs.apply_verification_result(&result, &event_key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::bus::consumer::{deliver, ConsumerPolicy, Delivery, RetryPolicy};
    use crate::db::{DeadLetterStore, WithdrawalType};
    use crate::models::CreateWithdrawalRequest;
    use crate::test_support::{FailingBus, Fixture};

    async fn approved_withdrawal(fx: &Fixture, withdrawal_type: WithdrawalType) -> WithdrawalRecord {
        let campaign = fx.active_campaign(10_000_000, 5_000_000).await;
        let withdrawals = fx.withdrawal_service();
        let withdrawal = withdrawals
            .create(CreateWithdrawalRequest {
                campaign_id: campaign.id,
                amount: 1_000_000,
                reason: "Buy rice".to_string(),
                withdrawal_type,
                quick: false,
            })
            .await
            .unwrap();
        withdrawals.approve(withdrawal.id).await.unwrap()
    }

    fn upload(url: &str) -> UploadProofRequest {
        UploadProofRequest {
            evidence_url: url.to_string(),
            description: Some("receipt".to_string()),
        }
    }

    fn result_message(proof_id: Uuid, score: f64, is_valid: bool) -> BusMessage {
        BusMessage {
            id: Uuid::new_v4(),
            topic: topics::PROOF_VERIFICATION_RESULT.to_string(),
            key: proof_id.to_string(),
            payload: json!({
                "proofId": proof_id,
                "score": score,
                "isValid": is_valid,
                "analysisDetails": "Invoice matches the reason",
                "metadata": { "has_exif_warning": true, "details": "no camera model", "is_duplicate": false }
            }),
            published_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upload_on_pending_withdrawal_rejected() {
        let fx = Fixture::new();
        let campaign = fx.active_campaign(10_000_000, 0).await;
        let withdrawal = fx
            .withdrawal_service()
            .create(CreateWithdrawalRequest {
                campaign_id: campaign.id,
                amount: 1_000,
                reason: "r".to_string(),
                withdrawal_type: WithdrawalType::Standard,
                quick: false,
            })
            .await
            .unwrap();

        let err = fx
            .proof_service()
            .upload_proof(withdrawal.id, upload("https://img/1.png"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "INVALID_STATUS");
        assert!(fx.bus.published(topics::PROOF_VERIFICATION_REQUEST).is_empty());
    }

    #[tokio::test]
    async fn test_upload_publishes_classified_request() {
        let fx = Fixture::new();
        let withdrawal = approved_withdrawal(&fx, WithdrawalType::Emergency).await;

        let proof = fx
            .proof_service()
            .upload_proof(withdrawal.id, upload("https://img/selfie.png"))
            .await
            .unwrap();

        assert_eq!(proof.ai_status, AiStatus::Processing);
        assert_eq!(proof.proof_type, ProofType::Selfie);

        let published = fx.bus.published(topics::PROOF_VERIFICATION_REQUEST);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, proof.id.to_string());
        assert_eq!(published[0].payload["type"], "SELFIE");
        assert_eq!(published[0].payload["context"]["campaignContext"], "Flood relief - Rebuild homes");
        assert_eq!(published[0].payload["context"]["withdrawalReason"], "Buy rice");
    }

    #[tokio::test]
    async fn test_upload_publish_failure_removes_proof() {
        let mut fx = Fixture::new();
        let withdrawal = approved_withdrawal(&fx, WithdrawalType::Standard).await;
        fx.publisher = Arc::new(FailingBus);
        let service = fx.proof_service();

        let err = service.upload_proof(withdrawal.id, upload("https://img/1.png")).await.unwrap_err();

        assert_eq!(err.code(), "BUS_ERROR");
        assert!(service.list_proofs(withdrawal.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hybrid_upload_publishes_reasoning_request() {
        let fx = Fixture::new();
        let withdrawal = approved_withdrawal(&fx, WithdrawalType::Standard).await;

        let proof = fx
            .proof_service()
            .upload_hybrid_proof(
                withdrawal.id,
                UploadHybridProofRequest {
                    bill_image_urls: vec!["https://img/bill1.png".to_string(), "https://img/bill2.png".to_string()],
                    scene_image_urls: vec!["https://img/scene.png".to_string()],
                    description: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(proof.evidence_url, "https://img/bill1.png");
        assert_eq!(proof.supporting_urls.len(), 2);

        let published = fx.bus.published(topics::HYBRID_REASONING_REQUEST);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload["listBillImageUrl"].as_array().unwrap().len(), 2);
        assert_eq!(published[0].payload["campaignGoal"], "Rebuild homes");
    }

    #[tokio::test]
    async fn test_verdict_applied_once_and_surfaced() {
        let fx = Fixture::new();
        let withdrawal = approved_withdrawal(&fx, WithdrawalType::Standard).await;
        let service = fx.proof_service();
        let proof = service.upload_proof(withdrawal.id, upload("https://img/1.png")).await.unwrap();
        let mut updates = fx.ws.register(proof_topic(withdrawal.id)).await;

        let handler = ProofResultHandler::new(service.clone());
        let message = result_message(proof.id, 91.6, true);
        handler.handle(&message).await.unwrap();
        handler.handle(&message).await.unwrap();

        let stored = service.get_proof(proof.id).await.unwrap();
        assert_eq!(stored.ai_status, AiStatus::Verified);
        assert_eq!(stored.ai_score, Some(92));
        let analysis = stored.ai_analysis.unwrap();
        assert!(analysis.starts_with("Invoice matches the reason"));
        assert!(analysis.contains("[EXIF] no camera model"));

        let first: serde_json::Value = serde_json::from_str(&updates.recv().await.unwrap()).unwrap();
        assert_eq!(first["event"], "proof_update");
        let second: serde_json::Value = serde_json::from_str(&updates.recv().await.unwrap()).unwrap();
        assert_eq!(second["event"], "proof_review_candidate");
        assert!(updates.try_recv().is_err());

        // Surfacing for review leaves the withdrawal alone.
        let withdrawal = fx.withdrawal_service().get(withdrawal.id).await.unwrap();
        assert_eq!(withdrawal.status, WithdrawalStatus::WaitingProof);
    }

    #[tokio::test]
    async fn test_new_event_version_is_applied_again() {
        let fx = Fixture::new();
        let withdrawal = approved_withdrawal(&fx, WithdrawalType::Standard).await;
        let service = fx.proof_service();
        let proof = service.upload_proof(withdrawal.id, upload("https://img/1.png")).await.unwrap();

        let mut result = ProofVerificationResult {
            proof_id: proof.id,
            score: 40.0,
            is_valid: false,
            analysis_details: "blurry".to_string(),
            metadata: None,
            event_version: Some("1".to_string()),
        };
        let key = verdict_event_key(proof.id, result.event_version.as_deref(), &result);
        service.apply_verification_result(&result, &key).await.unwrap();

        result.score = 85.0;
        result.is_valid = true;
        result.event_version = Some("2".to_string());
        let key = verdict_event_key(proof.id, result.event_version.as_deref(), &result);
        let outcome = service.apply_verification_result(&result, &key).await.unwrap();

        assert!(matches!(outcome, VerdictOutcome::Applied(_)));
        assert_eq!(service.get_proof(proof.id).await.unwrap().ai_score, Some(85));
    }

    #[tokio::test]
    async fn test_out_of_range_score_dead_lettered_immediately() {
        let fx = Fixture::new();
        let withdrawal = approved_withdrawal(&fx, WithdrawalType::Standard).await;
        let service = fx.proof_service();
        let proof = service.upload_proof(withdrawal.id, upload("https://img/1.png")).await.unwrap();

        let handler = ProofResultHandler::new(service.clone());
        let policy = ConsumerPolicy {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                multiplier: 2.0,
                max_backoff: Duration::from_millis(5),
            },
            dead_letters: fx.stores.dead_letters.clone(),
        };

        let delivery = deliver(&handler, &result_message(proof.id, 140.0, true), &policy).await;

        assert_eq!(delivery, Delivery::DeadLettered { attempts: 1 });
        assert_eq!(fx.store.list_dead_letters(10, 0).await.unwrap().len(), 1);
        assert_eq!(service.get_proof(proof.id).await.unwrap().ai_status, AiStatus::Processing);
    }

    #[tokio::test]
    async fn test_hybrid_callback_enriches_analysis() {
        let fx = Fixture::new();
        let withdrawal = approved_withdrawal(&fx, WithdrawalType::Standard).await;
        let service = fx.proof_service();
        let proof = service.upload_proof(withdrawal.id, upload("https://img/1.png")).await.unwrap();

        let callback = HybridVerificationCallback {
            proof_id: proof.id,
            trust_score: 72.0,
            is_valid: true,
            analysis_summary: "Bills match scene".to_string(),
            trust_hash: Some("abc123".to_string()),
            gemini_total_amount: Some(1_000_000.0),
            gemini_items_count: Some(3),
            gemini_price_warnings: vec!["rice above market price".to_string()],
            clip_scene_score: Some(0.81),
            duplicate_detected: false,
            timestamp: None,
        };

        service.apply_hybrid_callback(&callback).await.unwrap();
        let outcome = service.apply_hybrid_callback(&callback).await.unwrap();
        assert!(matches!(outcome, VerdictOutcome::Duplicate));

        let analysis = service.get_proof(proof.id).await.unwrap().ai_analysis.unwrap();
        assert_eq!(
            analysis,
            "Bills match scene\n[Gemini] total 1000000, 3 items\n[Gemini] price warning: rice above market price\n[CLIP] scene match 0.81\n[Hash] abc123"
        );
    }

    #[tokio::test]
    async fn test_verdict_for_unknown_proof() {
        let fx = Fixture::new();
        let handler = ProofResultHandler::new(fx.proof_service());

        let result = handler.handle(&result_message(Uuid::new_v4(), 50.0, false)).await;
        assert!(matches!(result, Err(HandlerError::Permanent(_))));
    }
}
